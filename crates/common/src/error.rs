use thiserror::Error;

/// Rejected requester input: a link, a color, or a font size.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("expected 4 comma-separated components (r,g,b,a), got {0}")]
    ColorArity(usize),

    #[error("'{0}' is not a value in 0..=255")]
    ColorChannel(String),

    #[error("font size must be a positive integer, got '{0}'")]
    FontSize(String),
}

pub type Result<T> = std::result::Result<T, Error>;
