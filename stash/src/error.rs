//! Error types for stash operations.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid index pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Timestamp '{0}' is not in the required format (YYYY-MM-DDTHH:MM:SS[.fraction])")]
    InvalidTimestamp(String),

    #[error("Unknown duration '{0}' (expected one of {1})")]
    InvalidDuration(String, String),

    #[error("No index matches pattern '{0}'")]
    NoPartition(String),

    #[error("Document has no string field '{0}' to use as timestamp")]
    MissingTimestamp(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Cannot evaluate '{0}': value is not a mapping")]
    NotAMapping(String),

    #[error("Cannot evaluate '{0}': key not found")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
