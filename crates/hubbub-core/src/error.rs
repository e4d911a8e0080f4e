use thiserror::Error;
use url::Url;

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Hub has already been disposed")]
    Disposed,

    #[error("Requested hub {requested} does not match this hub ({expected})")]
    HubMismatch {
        expected: String,
        requested: Url,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Invalid Link header: {0}")]
    InvalidLinkHeader(String),
}

impl HubError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn link(msg: impl Into<String>) -> Self {
        Self::InvalidLinkHeader(msg.into())
    }
}
