//! Embedding seam. The pipeline talks to this trait; production wires in
//! `embed_client::EmbeddingClient`, tests wire in `FixedEmbedder`.

use async_trait::async_trait;

use embed_client::{EmbedError, EmbeddingClient};
use magpie_common::MagpieError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MagpieError>;
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MagpieError> {
        EmbeddingClient::embed(self, text)
            .await
            .map_err(embed_error)
    }
}

/// Map the client's typed errors into the pipeline taxonomy. Client-side
/// (4xx) API errors will fail identically on retry, so they land in
/// Validation rather than the transient bucket.
pub(crate) fn embed_error(err: EmbedError) -> MagpieError {
    match err {
        EmbedError::RateLimited => MagpieError::RateLimited("embedding provider".to_string()),
        EmbedError::DimensionMismatch { expected, got } => {
            MagpieError::EmbeddingDimensionMismatch { expected, got }
        }
        EmbedError::Network(msg) => MagpieError::TransientNetwork(msg),
        EmbedError::Api { status, message } if status >= 500 => {
            MagpieError::TransientNetwork(format!("embedding API {status}: {message}"))
        }
        EmbedError::Api { status, message } => {
            MagpieError::Validation(format!("embedding API {status}: {message}"))
        }
        EmbedError::EmptyResponse => {
            MagpieError::Validation("embedding response had no vector".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_stays_typed() {
        let err = embed_error(EmbedError::DimensionMismatch {
            expected: 1536,
            got: 768,
        });
        assert!(matches!(
            err,
            MagpieError::EmbeddingDimensionMismatch {
                expected: 1536,
                got: 768
            }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(embed_error(EmbedError::Api {
            status: 503,
            message: String::new()
        })
        .is_transient());
        assert!(!embed_error(EmbedError::Api {
            status: 401,
            message: String::new()
        })
        .is_transient());
        assert!(embed_error(EmbedError::Network("reset".into())).is_transient());
    }
}
