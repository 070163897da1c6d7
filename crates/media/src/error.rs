use std::{error::Error as StdError, path::PathBuf};

/// A watermark attempt that did not produce output.
///
/// Never aborts a job: the pipeline logs it and delivers the original bytes.
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("font unavailable: {0}")]
    Font(String),

    #[error("transcoder '{binary}' not found")]
    ToolUnavailable {
        binary: String,
        #[source]
        source: which::Error,
    },

    #[error("transcoder exited with {status}: {stderr}")]
    ToolFailed { status: String, stderr: String },

    #[error("overlay image {} does not exist", path.display())]
    MissingOverlay { path: PathBuf },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("watermarking cancelled")]
    Cancelled,
}

impl WatermarkError {
    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn font(message: impl Into<String>) -> Self {
        Self::Font(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WatermarkError>;
