use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbedError>;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by embedding provider")]
    RateLimited,

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("No embedding in response")]
    EmptyResponse,
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        EmbedError::Network(err.to_string())
    }
}

/// Whether a failed request is worth another attempt. Client errors and
/// dimension mismatches will fail identically on retry; rate limits are the
/// caller's decision, not ours.
pub fn is_retryable(err: &EmbedError) -> bool {
    match err {
        EmbedError::Network(_) => true,
        EmbedError::Api { status, .. } => *status >= 500,
        EmbedError::RateLimited
        | EmbedError::DimensionMismatch { .. }
        | EmbedError::EmptyResponse => false,
    }
}
