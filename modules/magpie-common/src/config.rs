use std::env;

use tracing::info;

use crate::error::MagpieError;

/// Embedding provider settings. Every supported provider speaks the
/// OpenAI-compatible `/embeddings` shape; presets only fill in defaults,
/// so one client type serves them all.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Embedding provider
    pub embedding: EmbeddingConfig,

    // X API (enrichment only)
    pub x_bearer_token: Option<String>,

    // Sync
    pub state_file: String,
    pub sync_workers: usize,
    pub enrich_batch_size: usize,
}

/// (api_base, model, dimensions) defaults per known provider.
/// Unknown providers must supply all three explicitly via env.
fn provider_preset(provider: &str) -> Option<(&'static str, &'static str, usize)> {
    match provider {
        "openai" => Some(("https://api.openai.com/v1", "text-embedding-3-small", 1536)),
        "deepinfra" => Some((
            "https://api.deepinfra.com/v1/openai",
            "BAAI/bge-large-en-v1.5",
            1024,
        )),
        "together" => Some((
            "https://api.together.xyz/v1",
            "togethercomputer/m2-bert-80M-8k-retrieval",
            768,
        )),
        "ollama" => Some(("http://localhost:11434/v1", "nomic-embed-text", 768)),
        _ => None,
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Missing required values fail here, before any network call is made.
    pub fn from_env() -> Result<Self, MagpieError> {
        let provider = env::var("EMBEDDING_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let preset = provider_preset(&provider);

        let api_base = match env::var("EMBEDDING_API_BASE") {
            Ok(v) => v,
            Err(_) => preset.map(|(base, _, _)| base.to_string()).ok_or_else(|| {
                MagpieError::Config(format!(
                    "EMBEDDING_API_BASE is required for provider '{provider}'"
                ))
            })?,
        };
        let model = match env::var("EMBEDDING_MODEL") {
            Ok(v) => v,
            Err(_) => preset.map(|(_, model, _)| model.to_string()).ok_or_else(|| {
                MagpieError::Config(format!(
                    "EMBEDDING_MODEL is required for provider '{provider}'"
                ))
            })?,
        };
        let dimensions = match env::var("EMBEDDING_DIMENSIONS") {
            Ok(v) => v.parse().map_err(|_| {
                MagpieError::Config("EMBEDDING_DIMENSIONS must be a number".to_string())
            })?,
            Err(_) => preset.map(|(_, _, dims)| dims).ok_or_else(|| {
                MagpieError::Config(format!(
                    "EMBEDDING_DIMENSIONS is required for provider '{provider}'"
                ))
            })?,
        };

        // Ollama runs locally without auth; every hosted provider needs a key.
        let api_key = env::var("EMBEDDING_API_KEY").unwrap_or_default();
        if api_key.is_empty() && provider != "ollama" {
            return Err(MagpieError::Config(format!(
                "EMBEDDING_API_KEY is required for provider '{provider}'"
            )));
        }

        Ok(Self {
            neo4j_uri: env::var("NEO4J_URI")
                .unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            neo4j_user: env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            neo4j_password: required_env("NEO4J_PASSWORD")?,
            embedding: EmbeddingConfig {
                provider,
                api_base,
                api_key,
                model,
                dimensions,
            },
            x_bearer_token: env::var("X_BEARER_TOKEN").ok(),
            state_file: env::var("MAGPIE_STATE_FILE")
                .unwrap_or_else(|_| "./magpie-state.json".to_string()),
            sync_workers: parsed_env("SYNC_WORKERS", 4)?,
            enrich_batch_size: parsed_env("ENRICH_BATCH_SIZE", 100)?,
        })
    }

    /// The X API token, required only for the enrichment path.
    pub fn require_x_bearer_token(&self) -> Result<&str, MagpieError> {
        self.x_bearer_token.as_deref().ok_or_else(|| {
            MagpieError::Config(
                "X_BEARER_TOKEN environment variable is required for enrichment".to_string(),
            )
        })
    }

    /// Log the effective configuration with secrets withheld.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = %self.neo4j_uri,
            provider = %self.embedding.provider,
            api_base = %self.embedding.api_base,
            model = %self.embedding.model,
            dimensions = self.embedding.dimensions,
            state_file = %self.state_file,
            sync_workers = self.sync_workers,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> Result<String, MagpieError> {
    env::var(key).map_err(|_| MagpieError::Config(format!("{key} environment variable is required")))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, MagpieError> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| MagpieError::Config(format!("{key} must be a number"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_providers_have_presets() {
        for provider in ["openai", "deepinfra", "together", "ollama"] {
            let (base, model, dims) = provider_preset(provider).expect(provider);
            assert!(base.starts_with("http"));
            assert!(!model.is_empty());
            assert!(dims > 0);
        }
    }

    #[test]
    fn unknown_provider_has_no_preset() {
        assert!(provider_preset("custom").is_none());
        assert!(provider_preset("voyage").is_none());
    }
}
