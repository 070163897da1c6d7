//! Configuration loading, validation, and env substitution.
//!
//! Config files: `tidemark.toml`, `tidemark.yaml`, or `tidemark.json`
//! Searched in `./` then `~/.config/tidemark/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        TelegramConfig, TidemarkConfig, TranscoderConfig, TransferConfig, WatermarkConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, check_config, validate},
};
