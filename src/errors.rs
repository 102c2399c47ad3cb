use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// A single-item request resolved to a collection. `collection_ref` is the
    /// reference to hand to the import path instead.
    #[error("Unsupported entry type: {message}")]
    UnsupportedEntryType {
        message: String,
        collection_ref: Option<String>,
    },

    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("Network error (retryable): {0}")]
    RetryableNetwork(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),
}

impl AppError {
    /// Whether the caller may re-attempt the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::RetryableNetwork(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
