use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::TidemarkConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "tidemark.toml",
    "tidemark.yaml",
    "tidemark.yml",
    "tidemark.json",
];

/// Environment variable that overrides `telegram.token`.
pub const TOKEN_ENV_VAR: &str = "TIDEMARK_TELEGRAM_TOKEN";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TidemarkConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./tidemark.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/tidemark/tidemark.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TidemarkConfig::default()` if no config file is found or the
/// file fails to parse.
pub fn discover_and_load() -> TidemarkConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TidemarkConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/tidemark/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "tidemark").map(|d| d.config_dir().to_path_buf())
}

/// Apply environment overrides on top of a loaded config.
///
/// `TIDEMARK_TELEGRAM_TOKEN` wins over the file value when set and non-empty.
pub fn apply_env_overrides(config: TidemarkConfig) -> TidemarkConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: TidemarkConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> TidemarkConfig {
    if let Some(token) = lookup(TOKEN_ENV_VAR).filter(|t| !t.trim().is_empty()) {
        debug!(var = TOKEN_ENV_VAR, "telegram token overridden from environment");
        config.telegram.token = Some(Secret::new(token));
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TidemarkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
