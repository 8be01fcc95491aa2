//! Provider abstractions for the external collaborators: search backend,
//! embeddings, structured generation and OCR.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod azure_ocr;
pub mod gemini;
pub mod noop;
pub mod openai;
pub mod opensearch;

pub use opensearch::{DateValue, Fragment, SearchHit};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("empty response")]
    EmptyResponse,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
}

/// A single structured-generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub system: Option<&'a str>,
    pub prompt: &'a str,
    /// JSON schema the output must follow; `None` asks for free text.
    pub output_schema: Option<&'a serde_json::Value>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            system: None,
            prompt,
            output_schema: None,
            temperature: 0.3,
            max_output_tokens: 2048,
        }
    }

    pub fn with_system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_schema(mut self, schema: &'a serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_limits(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }
}

/// Index layout the search backend must expose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSchema {
    pub vector_dim: usize,
    /// Similarity space of the vector field, e.g. `cosinesimil`.
    pub metric: String,
}

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError>;
}

#[async_trait::async_trait]
pub trait GenerationService: Send + Sync {
    /// Model identifier reported in result version info.
    fn model(&self) -> &str;

    /// Returns the raw model text. Safety refusals surface as
    /// [`ProviderError::Blocked`], empty answers as [`ProviderError::EmptyResponse`].
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ProviderError>;
}

#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    async fn keyword_search(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, ProviderError>;
    async fn vector_search(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, ProviderError>;
    /// Creates the index when missing. Must be idempotent.
    async fn ensure_schema(&self, schema: &IndexSchema) -> Result<(), ProviderError>;
    fn index_name(&self) -> &str;
}

#[async_trait::async_trait]
pub trait OcrService: Send + Sync {
    async fn extract_text(&self, document: &[u8], content_type: &str)
        -> Result<String, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    embeddings: HashMap<String, Arc<dyn EmbeddingProvider>>,
    generators: HashMap<String, Arc<dyn GenerationService>>,
    pub preferred_embedding: Option<String>,
    pub preferred_generator: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding(mut self, name: &str, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embeddings.insert(name.to_string(), provider);
        self
    }

    pub fn with_generator(mut self, name: &str, provider: Arc<dyn GenerationService>) -> Self {
        self.generators.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_embedding(mut self, name: &str) -> Self {
        self.preferred_embedding = Some(name.to_string());
        self
    }

    pub fn set_preferred_generator(mut self, name: &str) -> Self {
        self.preferred_generator = Some(name.to_string());
        self
    }

    pub fn embedding(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_embedding.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no embedding provider configured".into())
            })?;
        self.embeddings
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }

    pub fn generator(
        &self,
        name: Option<&str>,
    ) -> Result<Arc<dyn GenerationService>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_generator.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no generation provider configured".into())
            })?;
        self.generators
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

/// Turns a non-success HTTP response into a [`ProviderError`] carrying the body.
pub(crate) async fn check_status(
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.unwrap_or(bytes::Bytes::from_static(b""));
    Err(ProviderError::RequestFailed(format!(
        "status {} body {}",
        status,
        String::from_utf8_lossy(&body)
    )))
}
