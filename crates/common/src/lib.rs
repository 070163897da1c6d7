//! Shared types, error definitions, and naming helpers used across all tidemark crates.

pub mod error;
pub mod naming;
pub mod types;

pub use {
    error::{Error, Result},
    types::{ContentKind, RgbaColor, SourceDescriptor, WatermarkSpec},
};
