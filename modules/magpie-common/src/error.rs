use thiserror::Error;

pub type Result<T> = std::result::Result<T, MagpieError>;

#[derive(Error, Debug)]
pub enum MagpieError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    EmbeddingDimensionMismatch { expected: usize, got: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl MagpieError {
    /// Whether the orchestrator should retry the operation that produced this.
    /// Validation and configuration failures are permanent; rate limits are
    /// handled by stopping batch submission, not by retrying in place.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MagpieError::TransientStore(_) | MagpieError::TransientNetwork(_)
        )
    }
}
