//! Store error types

/// Error type for store drivers
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned error: status={status}, body={body}")]
    Status { status: u16, body: String },

    #[error("session '{0}' not found or expired")]
    SessionNotFound(String),

    #[error("invalid session ttl: {0}")]
    InvalidTtl(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
