#![allow(dead_code)]

use providers::{
    EmbedResponse, EmbeddingProvider, Fragment, GenerationRequest, GenerationService, IndexSchema,
    OcrService, ProviderError, SearchBackend, SearchHit,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tariff_core::classifier::Classifier;
use tariff_core::config::{FusionPolicy, GuardrailConfig};
use tariff_core::extractor::TextExtractor;
use tariff_core::followup::FollowupResponder;
use tariff_core::generation::GenerationContract;
use tariff_core::retriever::FusionRetriever;
use tariff_core::search::IndexGuard;
use std::time::Duration;

pub fn hit(id: &str, score: f32, text: &str) -> SearchHit {
    SearchHit {
        id: format!("_{id}"),
        score,
        fragment: Fragment {
            fragment_id: Some(id.to_string()),
            text: text.to_string(),
            bucket: Some("hs_notes".into()),
            doc_id: Some("hs2022".into()),
            ..Default::default()
        },
    }
}

pub fn tyre_hits() -> Vec<SearchHit> {
    vec![
        hit("frag-4011-10", 12.0, "4011.10 New pneumatic tyres, of rubber, of a kind used on motor cars"),
        hit("frag-4011-20", 9.5, "4011.20 New pneumatic tyres, of rubber, of a kind used on buses or lorries"),
        hit("frag-ch40-note", 4.1, "Chapter 40 notes: rubber and articles thereof"),
    ]
}

#[derive(Default)]
pub struct FakeBackend {
    pub keyword: Vec<SearchHit>,
    pub vector: Vec<SearchHit>,
    pub fail: bool,
    pub ensure_hangs: bool,
    pub keyword_calls: AtomicUsize,
    pub vector_calls: AtomicUsize,
    pub ensure_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_hits(keyword: Vec<SearchHit>, vector: Vec<SearchHit>) -> Self {
        Self {
            keyword,
            vector,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl SearchBackend for FakeBackend {
    async fn keyword_search(&self, _text: &str, k: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::RequestFailed("connection refused".into()));
        }
        Ok(self.keyword.iter().take(k).cloned().collect())
    }

    async fn vector_search(&self, _embedding: &[f32], k: usize) -> Result<Vec<SearchHit>, ProviderError> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::RequestFailed("connection refused".into()));
        }
        Ok(self.vector.iter().take(k).cloned().collect())
    }

    async fn ensure_schema(&self, _schema: &IndexSchema) -> Result<(), ProviderError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.ensure_hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    fn index_name(&self) -> &str {
        "tariff_fragments_test"
    }
}

pub struct FakeEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, ProviderError> {
        Ok(EmbedResponse {
            vectors: texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect(),
        })
    }
}

pub enum Reply {
    Text(String),
    Blocked,
    Fail,
    Hang,
}

pub struct FakeGenerator {
    reply: Reply,
    pub calls: AtomicUsize,
    pub last_prompt: Mutex<Option<String>>,
}

impl FakeGenerator {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn text(body: &str) -> Self {
        Self::new(Reply::Text(body.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GenerationService for FakeGenerator {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(request.prompt.to_string());
        match &self.reply {
            Reply::Text(t) => Ok(t.clone()),
            Reply::Blocked => Err(ProviderError::Blocked("SAFETY".into())),
            Reply::Fail => Err(ProviderError::RequestFailed("503".into())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }
    }
}

pub struct FakeOcr {
    pub text: Option<String>,
}

#[async_trait::async_trait]
impl OcrService for FakeOcr {
    async fn extract_text(&self, _document: &[u8], _content_type: &str) -> Result<String, ProviderError> {
        self.text
            .clone()
            .ok_or_else(|| ProviderError::RequestFailed("ocr down".into()))
    }
}

pub const TYRE_OUTPUT: &str = r#"{
  "candidates": [
    {"code": "4011.10", "description": "New pneumatic tyres of rubber, for motor cars", "level": "subheading", "confidence": 0.86},
    {"code": "4011.20", "description": "For buses or lorries", "level": "subheading", "confidence": "0.35"}
  ],
  "applied_rules": ["GRI 1", "GRI 6"],
  "inclusions": ["Radial tyres for passenger cars"],
  "exclusions": ["Retreaded tyres (4012)"],
  "missing_fields": [],
  "evidence": [
    {"fragment_id": "frag-4011-10", "score": 0.9, "reason": "describes car tyres"},
    {"fragment_id": "frag-made-up", "score": 0.9, "reason": "invented"}
  ],
  "versions": {"hs_edition": "HS_2022"},
  "warnings": []
}"#;

pub fn guardrails() -> GuardrailConfig {
    GuardrailConfig::default()
}

pub fn retriever(backend: Arc<FakeBackend>) -> FusionRetriever {
    FusionRetriever::new(backend, FusionPolicy::Rrf).with_embedder(Arc::new(FakeEmbedder))
}

pub fn classifier(backend: Arc<FakeBackend>, generator: Arc<FakeGenerator>) -> Classifier {
    let retriever = retriever(backend.clone())
        .with_index_guard(IndexGuard::new(backend, IndexSchema { vector_dim: 3, metric: "cosinesimil".into() }));
    Classifier::new(retriever, GenerationContract::new(generator), guardrails())
}

pub fn classifier_with_ocr(
    backend: Arc<FakeBackend>,
    generator: Arc<FakeGenerator>,
    ocr: FakeOcr,
) -> Classifier {
    classifier(backend, generator).with_extractor(TextExtractor::new(Arc::new(ocr), Duration::from_secs(5)))
}

pub fn responder(generator: Arc<FakeGenerator>) -> FollowupResponder {
    FollowupResponder::new(generator)
}
