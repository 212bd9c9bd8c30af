use thiserror::Error;

/// Why a source could not be fetched. Any of these counts as one failure
/// for the source's consecutive error count.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source returned HTTP {0}")]
    Status(u16),

    #[error("malformed feed document: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Unreachable(e.to_string())
        }
    }
}

impl From<feed_rs::parser::ParseFeedError> for FetchError {
    fn from(e: feed_rs::parser::ParseFeedError) -> Self {
        FetchError::Malformed(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("summarizer error: {0}")]
    Summarizer(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
