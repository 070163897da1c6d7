use std::error::Error as StdError;

/// Crate-wide result type for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a job stopped before completing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source could not be reached, or answered with a non-success status.
    #[error("source unavailable: {message}")]
    SourceUnavailable { message: String },

    /// Requester input that cannot be accepted (URL, color, size).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The source stream broke mid-download.
    #[error("download failed: {message}")]
    DownloadFailed { message: String },

    /// A destination call failed. Batches sent before it stay delivered.
    #[error("delivery failed: {message}")]
    DeliveryFailed { message: String },

    /// The requester pressed Cancel. Not a failure.
    #[error("cancelled")]
    Cancelled,

    /// Wrapped source error from the local environment (temp dirs, tasks).
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn source_unavailable(message: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn download_failed(message: impl std::fmt::Display) -> Self {
        Self::DownloadFailed {
            message: message.to_string(),
        }
    }

    /// Wrap a collaborator error, keeping its whole context chain.
    #[must_use]
    pub fn delivery_failed(context: &str, source: &anyhow::Error) -> Self {
        Self::DeliveryFailed {
            message: format!("{context}: {source:#}"),
        }
    }

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
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tidemark_common::Error> for Error {
    fn from(err: tidemark_common::Error) -> Self {
        Self::invalid_input(err)
    }
}
