use crate::{
    EmbedResponse, EmbeddingProvider, GenerationRequest, GenerationService, IndexSchema,
    OcrService, ProviderError, SearchBackend, SearchHit,
};

/// Stand-in for every collaborator when configuration is absent.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl EmbeddingProvider for NoopProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: vec![vec![]; texts.len()],
        })
    }
}

#[async_trait::async_trait]
impl GenerationService for NoopProvider {
    fn model(&self) -> &str {
        "noop"
    }

    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured(
            "no generation service credentials".into(),
        ))
    }
}

#[async_trait::async_trait]
impl SearchBackend for NoopProvider {
    async fn keyword_search(&self, _text: &str, _k: usize) -> Result<Vec<SearchHit>, ProviderError> {
        Err(ProviderError::NotConfigured("no search backend".into()))
    }

    async fn vector_search(
        &self,
        _embedding: &[f32],
        _k: usize,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        Err(ProviderError::NotConfigured("no search backend".into()))
    }

    async fn ensure_schema(&self, _schema: &IndexSchema) -> Result<(), ProviderError> {
        Ok(())
    }

    fn index_name(&self) -> &str {
        "noop"
    }
}

#[async_trait::async_trait]
impl OcrService for NoopProvider {
    async fn extract_text(
        &self,
        _document: &[u8],
        _content_type: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured("no OCR service".into()))
    }
}
