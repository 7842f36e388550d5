pub mod error;
pub mod types;

pub use error::{is_retryable, EmbedError, Result};
pub use types::{EmbeddingData, EmbeddingRequest, EmbeddingResponse};

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Per-request timeout. Applies to each attempt, not the whole retry loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Max attempts for transient failures (network errors, 5xx).
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff duration. Actual delay is base * 3^attempt plus 0-250ms jitter.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Client for any OpenAI-compatible embeddings endpoint. Provider selection
/// is pure configuration — base URL, model, and expected dimensions — with
/// no per-provider code paths.
///
/// Returned vectors are validated against the configured dimension count;
/// a mismatch is a hard error, never silently truncated or padded.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    request_dimensions: bool,
}

impl EmbeddingClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
            dimensions,
            request_dimensions: false,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Ask the provider to size the vector server-side via the `dimensions`
    /// request field. Only enable for providers that accept it (OpenAI's
    /// text-embedding-3 family); others reject unknown fields.
    pub fn with_request_dimensions(mut self, enabled: bool) -> Self {
        self.request_dimensions = enabled;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single text. Transient failures are retried up to
    /// MAX_ATTEMPTS with exponential backoff; rate limits and dimension
    /// mismatches surface immediately for the caller to handle.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: serde_json::Value::String(text.to_string()),
            dimensions: self.request_dimensions.then_some(self.dimensions),
        };

        for attempt in 0..MAX_ATTEMPTS {
            match self.send(&request).await {
                Ok(vector) => {
                    if vector.len() != self.dimensions {
                        return Err(EmbedError::DimensionMismatch {
                            expected: self.dimensions,
                            got: vector.len(),
                        });
                    }
                    return Ok(vector);
                }
                Err(e) if is_retryable(&e) && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = RETRY_BASE * 3u32.pow(attempt);
                    let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Embedding request failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EmbedError::Network("retries exhausted".to_string()))
    }

    /// Embed several texts. Sequential requests — array `input` support is
    /// uneven across providers, and per-item dimension validation stays
    /// simple this way.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    async fn send(&self, request: &EmbeddingRequest) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        debug!(model = %self.model, "Embedding request");

        let mut req = self.http.post(&url).timeout(REQUEST_TIMEOUT).json(request);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let response = req.send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EmbedError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbedError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_openai_base_url() {
        let client = EmbeddingClient::new("key", "text-embedding-3-small", 1536);
        assert_eq!(client.base_url, OPENAI_API_URL);
        assert_eq!(client.dimensions(), 1536);
        assert!(!client.request_dimensions);
    }

    #[test]
    fn with_base_url_trims_trailing_slash() {
        let client = EmbeddingClient::new("", "nomic-embed-text", 768)
            .with_base_url("http://localhost:11434/v1/");
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn dimensions_field_is_omitted_unless_enabled() {
        let request = EmbeddingRequest {
            model: "m".to_string(),
            input: serde_json::Value::String("t".to_string()),
            dimensions: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("dimensions"));

        let request = EmbeddingRequest {
            dimensions: Some(256),
            ..request
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"dimensions\":256"));
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&EmbedError::Network("reset".into())));
        assert!(is_retryable(&EmbedError::Api {
            status: 503,
            message: String::new()
        }));
        assert!(!is_retryable(&EmbedError::Api {
            status: 400,
            message: String::new()
        }));
        assert!(!is_retryable(&EmbedError::RateLimited));
        assert!(!is_retryable(&EmbedError::DimensionMismatch {
            expected: 1536,
            got: 768
        }));
    }

    #[test]
    fn dimension_mismatch_names_both_sizes() {
        let err = EmbedError::DimensionMismatch {
            expected: 1536,
            got: 1024,
        };
        let msg = err.to_string();
        assert!(msg.contains("1536"));
        assert!(msg.contains("1024"));
    }
}
