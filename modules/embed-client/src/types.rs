use serde::Deserialize;

/// Request body for the OpenAI-compatible `/embeddings` endpoint.
/// `input` is a bare string for single texts, an array for batches.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: serde_json::Value,
    /// Server-side output sizing. Only some providers accept the field,
    /// so it is omitted entirely unless explicitly enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
}
