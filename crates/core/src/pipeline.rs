//! Wires configuration into collaborators and exposes the session-aware service.

use crate::classifier::{ClassifyRequest, Classifier};
use crate::config::AppConfig;
use crate::error::{ClassifyError, RequestError};
use crate::extractor::TextExtractor;
use crate::followup::{enrich_followup_question, is_followup_question, FollowupResponder};
use crate::generation::GenerationContract;
use crate::models::{ClassificationResult, FollowupAnswer};
use crate::retriever::{FusionRetriever, RetrievalReport};
use crate::rules::{load_rules_from_dir, RuleEngine};
use crate::search::IndexGuard;
use crate::session::ConversationStore;
use anyhow::Context;
use providers::azure_ocr::{AzureOcrConfig, AzureOcrProvider};
use providers::gemini::{GeminiConfig, GeminiProvider};
use providers::noop::NoopProvider;
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::opensearch::{OpenSearchClient, OpenSearchConfig};
use providers::{IndexSchema, OcrService, ProviderRegistry, SearchBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| std::env::var(n).ok())
        .find(|v| !v.trim().is_empty())
}

/// A section's `base_url` applies only to the provider that section selects.
fn section_url(selected: &str, base_url: &Option<String>, provider: &str) -> Option<String> {
    base_url.clone().filter(|_| selected == provider)
}

/// Registers every provider whose credentials are present in the environment.
pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let noop = Arc::new(NoopProvider);
    let mut reg = ProviderRegistry::new()
        .with_embedding("noop", noop.clone())
        .with_generator("noop", noop);

    if let Some(key) = env_var(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]) {
        let gemini = |base_url: Option<String>| {
            Arc::new(GeminiProvider::new(GeminiConfig {
                api_key: key.clone(),
                base_url: base_url
                    .unwrap_or_else(|| providers::gemini::DEFAULT_BASE_URL.to_string()),
                embedding_model: config.embeddings.model.clone(),
                chat_model: config.generation.model.clone(),
            }))
        };
        reg = reg
            .with_embedding(
                "gemini",
                gemini(section_url(&config.embeddings.provider, &config.embeddings.base_url, "gemini")),
            )
            .with_generator(
                "gemini",
                gemini(section_url(&config.generation.provider, &config.generation.base_url, "gemini")),
            );
    }

    if let Some(key) = env_var(&["OPENAI_API_KEY"]) {
        let openai = |base_url: Option<String>| {
            Arc::new(OpenAiProvider::new(OpenAiConfig {
                api_key: key.clone(),
                base_url: base_url
                    .or_else(|| env_var(&["OPENAI_BASE_URL"]))
                    .unwrap_or_else(|| "https://api.openai.com".to_string()),
                embedding_model: config.embeddings.model.clone(),
                chat_model: config.generation.model.clone(),
            }))
        };
        reg = reg
            .with_embedding(
                "openai",
                openai(section_url(&config.embeddings.provider, &config.embeddings.base_url, "openai")),
            )
            .with_generator(
                "openai",
                openai(section_url(&config.generation.provider, &config.generation.base_url, "openai")),
            );
    }

    reg.set_preferred_embedding(&config.embeddings.provider)
        .set_preferred_generator(&config.generation.provider)
}

pub fn build_search_backend(config: &AppConfig) -> Arc<dyn SearchBackend> {
    match (config.search.provider.as_str(), &config.search.url) {
        ("opensearch", Some(url)) => Arc::new(OpenSearchClient::new(OpenSearchConfig {
            url: url.trim_end_matches('/').to_string(),
            index: config.search.index.clone(),
            username: config.search.username.clone(),
            password: env_var(&["OPENSEARCH_PASSWORD"]),
        })),
        ("opensearch", None) => {
            warn!("search.provider is opensearch but search.url is not set; retrieval disabled");
            Arc::new(NoopProvider)
        }
        _ => Arc::new(NoopProvider),
    }
}

pub fn build_ocr(config: &AppConfig) -> Arc<dyn OcrService> {
    if config.ocr.provider != "azure" {
        return Arc::new(NoopProvider);
    }
    match (&config.ocr.endpoint, env_var(&["AZURE_FORMREC_KEY"])) {
        (Some(endpoint), Some(key)) => Arc::new(AzureOcrProvider::new(AzureOcrConfig {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: key,
            model: config.ocr.model.clone(),
            api_version: config.ocr.api_version.clone(),
            poll_interval: Duration::from_millis(config.ocr.poll_interval_ms),
            max_polls: config.ocr.max_polls,
        })),
        _ => {
            warn!("azure OCR selected without endpoint or AZURE_FORMREC_KEY; OCR disabled");
            Arc::new(NoopProvider)
        }
    }
}

pub fn index_schema(config: &AppConfig) -> IndexSchema {
    IndexSchema {
        vector_dim: config.search.vector_dim,
        metric: config.search.knn_space.clone(),
    }
}

pub fn build_retriever(
    config: &AppConfig,
    registry: &ProviderRegistry,
    backend: Arc<dyn SearchBackend>,
) -> FusionRetriever {
    let mut retriever = FusionRetriever::new(backend.clone(), config.retrieval.fusion)
        .with_rrf_k(config.retrieval.rrf_k)
        .with_timeouts(
            Duration::from_millis(config.timeouts.search_ms),
            Duration::from_millis(config.timeouts.embedding_ms),
        );
    if config.embeddings.provider != "noop" {
        match registry.embedding(None) {
            Ok(embedder) => retriever = retriever.with_embedder(embedder),
            Err(e) => warn!("embedding provider unavailable, vector search disabled: {e}"),
        }
    }
    if config.search.ensure_index {
        retriever = retriever.with_index_guard(IndexGuard::new(backend, index_schema(config)));
    }
    retriever
}

fn generator(registry: &ProviderRegistry) -> Arc<dyn providers::GenerationService> {
    registry.generator(None).unwrap_or_else(|e| {
        warn!("generation provider unavailable, results will be offline: {e}");
        Arc::new(NoopProvider)
    })
}

pub fn build_classifier(config: &AppConfig, registry: &ProviderRegistry) -> anyhow::Result<Classifier> {
    let backend = build_search_backend(config);
    let retriever = build_retriever(config, registry, backend);
    let generation = GenerationContract::new(generator(registry))
        .with_snippets(config.generation.max_prompt_snippets, config.generation.snippet_chars)
        .with_sampling(config.generation.temperature, config.generation.max_output_tokens)
        .with_timeout(Duration::from_millis(config.timeouts.generation_ms))
        .with_hs_edition(&config.versions.hs_edition);

    let mut rules = RuleEngine::default();
    if let Some(path) = &config.rules.path {
        let extra = load_rules_from_dir(std::path::Path::new(path))
            .with_context(|| format!("loading rules from {path}"))?;
        info!(count = extra.len(), "loaded keyword rules");
        rules = rules.with_rules(extra);
    }

    Ok(Classifier::new(retriever, generation, config.guardrails.clone())
        .with_extractor(TextExtractor::new(
            build_ocr(config),
            Duration::from_millis(config.timeouts.ocr_ms),
        ))
        .with_rules(rules)
        .with_depth_multiplier(config.retrieval.depth_multiplier)
        .with_max_candidates(config.generation.max_candidates)
        .with_hs_edition(&config.versions.hs_edition))
}

pub fn build_responder(config: &AppConfig, registry: &ProviderRegistry) -> FollowupResponder {
    FollowupResponder::new(generator(registry))
        .with_timeout(Duration::from_millis(config.timeouts.generation_ms))
        .with_sampling(config.generation.temperature, config.generation.max_output_tokens)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatReply {
    Classification(ClassificationResult),
    Answer(String),
}

/// Classifier, follow-up responder and conversation store bound together.
pub struct TariffService {
    classifier: Classifier,
    responder: FollowupResponder,
    store: Arc<dyn ConversationStore>,
}

impl TariffService {
    pub fn new(
        classifier: Classifier,
        responder: FollowupResponder,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            classifier,
            responder,
            store,
        }
    }

    pub fn from_config(config: &AppConfig, store: Arc<dyn ConversationStore>) -> anyhow::Result<Self> {
        let registry = build_registry(config);
        Ok(Self::new(
            build_classifier(config, &registry)?,
            build_responder(config, &registry),
            store,
        ))
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub async fn classify(
        &self,
        session_id: &str,
        req: &ClassifyRequest,
    ) -> Result<ClassificationResult, ClassifyError> {
        let result = self.classifier.classify(req).await?;
        let query = req
            .text
            .clone()
            .or_else(|| req.file.as_ref().map(|f| f.name.clone()))
            .unwrap_or_default();
        let mut ctx = self.store.load(session_id).await?;
        let mut stored = result.clone();
        stored.debug_info = None;
        ctx.update(&query, stored);
        ctx.add_turn(&query, &result.summary());
        self.store.save(session_id, &ctx).await?;
        Ok(result)
    }

    pub async fn followup(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<FollowupAnswer, ClassifyError> {
        if question.trim().is_empty() {
            return Err(RequestError::MissingQuestion.into());
        }
        let mut ctx = self.store.load(session_id).await?;
        let history = ctx.history_text();
        let answer = self
            .responder
            .answer(question, ctx.last_result.as_ref(), Some(&history))
            .await;
        ctx.add_turn(question, &answer);
        self.store.save(session_id, &ctx).await?;
        Ok(FollowupAnswer { answer })
    }

    /// Routes a free-form message to the responder or to a new classification.
    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatReply, ClassifyError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RequestError::MissingQuery.into());
        }
        let mut ctx = self.store.load(session_id).await?;
        let Some(previous) = ctx.last_result.clone() else {
            let result = self.classify(session_id, &ClassifyRequest::text(message)).await?;
            return Ok(ChatReply::Classification(result));
        };
        if !is_followup_question(message, ctx.last_query.as_deref(), Some(&previous)) {
            let result = self.classify(session_id, &ClassifyRequest::text(message)).await?;
            return Ok(ChatReply::Classification(result));
        }
        let question = enrich_followup_question(message, ctx.last_query.as_deref(), &previous)
            .unwrap_or_else(|| message.to_string());
        let history = ctx.history_text();
        let answer = self
            .responder
            .answer(&question, Some(&previous), Some(&history))
            .await;
        ctx.add_turn(message, &answer);
        self.store.save(session_id, &ctx).await?;
        Ok(ChatReply::Answer(answer))
    }

    /// Retrieval only, for inspecting what the index returns.
    pub async fn search(&self, query: &str, limit: usize) -> RetrievalReport {
        self.classifier.retriever().retrieve_with_report(query, limit).await
    }

    pub async fn init_index(&self) -> anyhow::Result<()> {
        match self.classifier.retriever().index_guard() {
            Some(guard) => {
                let timeout = self.classifier.retriever().search_timeout();
                tokio::time::timeout(timeout, guard.ensure())
                    .await
                    .map_err(|_| anyhow::anyhow!("index creation timed out after {timeout:?}"))?
            }
            None => anyhow::bail!("index creation is disabled (search.ensure_index = false)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_follow_their_own_section() {
        let mut config = AppConfig::default();
        config.embeddings.provider = "openai".into();
        config.embeddings.base_url = Some("http://localhost:8081".into());
        config.generation.provider = "gemini".into();
        config.generation.base_url = Some("http://localhost:9090".into());

        let embed = section_url(&config.embeddings.provider, &config.embeddings.base_url, "openai");
        assert_eq!(embed.as_deref(), Some("http://localhost:8081"));
        let generate = section_url(&config.generation.provider, &config.generation.base_url, "openai");
        assert_eq!(generate, None);
        let generate = section_url(&config.generation.provider, &config.generation.base_url, "gemini");
        assert_eq!(generate.as_deref(), Some("http://localhost:9090"));
    }
}
