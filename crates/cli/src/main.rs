mod check_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tidemark_config::{Severity, TidemarkConfig},
    tracing::{debug, error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tidemark", about = "Tidemark: watermarking file-transfer bot", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./tidemark.toml, then ~/.config/tidemark/).
    #[arg(long, global = true, env = "TIDEMARK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Start the bot (default when no subcommand is provided).
    Run,
    /// Validate the configuration and runtime dependencies.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Effective config: explicit file or discovered one, then env overrides.
pub(crate) fn load(path: Option<&Path>) -> anyhow::Result<TidemarkConfig> {
    let config = match path {
        Some(path) => tidemark_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => tidemark_config::discover_and_load(),
    };
    Ok(tidemark_config::apply_env_overrides(config))
}

async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load(config_path)?;

    let diagnostics = tidemark_config::check_config(&config);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => error!("{d}"),
            Severity::Warning => warn!("{d}"),
            Severity::Info => debug!("{d}"),
        }
    }
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        anyhow::bail!("invalid configuration; run `tidemark check` for details");
    }

    let handle = tidemark_telegram::start_polling(&config).await?;
    let stopped = handle.cancel_token();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            handle.shutdown().await;
        },
        () = stopped.cancelled() => handle.join().await,
    }
    Ok(())
}

fn check(config_path: Option<&Path>, verbose: bool) {
    let result = check_commands::collect(config_path);
    eprint!("{}", check_commands::render(&result, verbose, true));
    if result.has_errors() {
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "tidemark starting");
            run(cli.config.as_deref()).await
        },
        Some(Commands::Check { verbose }) => {
            check(cli.config.as_deref(), verbose);
            Ok(())
        },
    }
}
