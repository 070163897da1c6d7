//! Configuration validation.
//!
//! Two passes: file-level checks (syntax, unknown or misspelled fields, type
//! errors) on the raw document, and semantic checks on the effective config
//! after env overrides.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{env_subst::substitute_env, loader::TOKEN_ENV_VAR, schema::TidemarkConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "missing", "range", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "watermark.font_size"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        (
            "telegram",
            Struct(HashMap::from([
                ("token", Leaf),
                ("api_url", Leaf),
                ("poll_timeout_secs", Leaf),
            ])),
        ),
        (
            "watermark",
            Struct(HashMap::from([
                ("text", Leaf),
                ("color", Leaf),
                ("font_size", Leaf),
                ("font_path", Leaf),
                ("image_path", Leaf),
            ])),
        ),
        (
            "transfer",
            Struct(HashMap::from([
                ("temp_dir", Leaf),
                ("probe_timeout_secs", Leaf),
                ("download_timeout_secs", Leaf),
                ("default_output_name", Leaf),
            ])),
        ),
        ("transcoder", Struct(HashMap::from([("binary", Leaf)]))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(c, d)| (d, c))
        .map(|(c, _)| c)
}

// ── File-level validation ───────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered config file
/// when `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => {
            let content = substitute_env(&content);
            match actual_path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => validate_value(serde_yaml::from_str(&content)),
                Some("json") => validate_value(serde_json::from_str(&content)),
                _ => validate_toml_str(&content),
            }
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate TOML text: syntax, unknown fields, and types.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    match toml::from_str::<toml::Value>(toml_str) {
        Ok(value) => match serde_json::to_value(value) {
            Ok(json) => validate_json_value(&json),
            Err(e) => syntax_error(format!("TOML conversion error: {e}")),
        },
        Err(e) => syntax_error(format!("TOML syntax error: {e}")),
    }
}

fn validate_value<E: std::fmt::Display>(
    parsed: Result<serde_json::Value, E>,
) -> ValidationResult {
    match parsed {
        Ok(value) => validate_json_value(&value),
        Err(e) => syntax_error(format!("syntax error: {e}")),
    }
}

fn validate_json_value(value: &serde_json::Value) -> ValidationResult {
    let mut diagnostics = Vec::new();
    check_unknown_fields(value, &build_schema_map(), "", &mut diagnostics);

    if let Err(e) = serde_json::from_value::<TidemarkConfig>(value.clone()) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        ));
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn syntax_error(message: String) -> ValidationResult {
    ValidationResult {
        diagnostics: vec![Diagnostic::new(Severity::Error, "syntax", "", message)],
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "unknown-field",
            path,
            message,
        ));
    }
}

// ── Semantic validation ─────────────────────────────────────────────────────

/// Semantic checks on the effective config (after env overrides).
#[must_use]
pub fn check_config(config: &TidemarkConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    match config.telegram.token() {
        None => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "telegram.token",
            format!("bot token is not set (config file or {TOKEN_ENV_VAR})"),
        )),
        Some(token) if token.contains("${") => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "missing",
            "telegram.token",
            "token contains an unresolved environment placeholder",
        )),
        Some(_) => {},
    }

    if config.telegram.poll_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "telegram.poll_timeout_secs",
            "0 disables long polling and busy-loops getUpdates",
        ));
    }

    if config.watermark.font_size == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "range",
            "watermark.font_size",
            "font size must be greater than zero",
        ));
    }
    if config.watermark.text.trim().is_empty() && config.watermark.image_path.is_none() {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "range",
            "watermark",
            "no text or image configured; files pass through unmarked by default",
        ));
    }
    for (path, value) in [
        ("watermark.font_path", &config.watermark.font_path),
        ("watermark.image_path", &config.watermark.image_path),
    ] {
        if let Some(p) = value
            && !p.exists()
        {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "file-ref",
                path,
                format!("{} does not exist", p.display()),
            ));
        }
    }

    for (path, value) in [
        (
            "transfer.probe_timeout_secs",
            config.transfer.probe_timeout_secs,
        ),
        (
            "transfer.download_timeout_secs",
            config.transfer.download_timeout_secs,
        ),
    ] {
        if value == 0 {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "range",
                path,
                "timeout must be greater than zero",
            ));
        }
    }
    if config.transfer.default_output_name.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "transfer.default_output_name",
            "empty default name produces files named only by their extension",
        ));
    }
    if config.transcoder.binary.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "range",
            "transcoder.binary",
            "no transcoder configured; videos are delivered unmarked",
        ));
    }

    diagnostics
}
