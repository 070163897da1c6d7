use thiserror::Error;

/// Failures fetching an uploaded file from the Bot API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("getFile failed for {file_id}: {source}")]
    FileLookup {
        file_id: String,
        #[source]
        source: teloxide::RequestError,
    },

    #[error("cannot build download URL for {path}: {message}")]
    FileUrl { path: String, message: String },

    #[error("file download failed: {0}")]
    FileDownload(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
