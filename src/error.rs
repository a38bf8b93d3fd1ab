use thiserror::Error;

// Basic error handling with thiserror
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    ParseFailed(#[from] serde_json::Error),

    #[error("URL encoding failed: {0}")]
    UrlEncodingFailed(#[from] serde_urlencoded::ser::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Connection explicitly closed or terminated")]
    ConnectionClosed,

    #[error("Feed rejected by server (close code {0})")]
    FeedRejected(u16),

    #[error("Retry budget exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Task panicked or cancelled")]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl FeedError {
    /// True when the error cannot be fixed by reconnecting with the same
    /// parameters; callers should surface it instead of retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeedError::FeedRejected(_) | FeedError::RetriesExhausted(_)
        )
    }
}
