use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    pub embeddings: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub ocr: OcrConfig,
    pub retrieval: RetrievalConfig,
    pub guardrails: GuardrailConfig,
    pub timeouts: TimeoutConfig,
    pub rules: RuleConfig,
    pub versions: VersionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/sessions.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// `opensearch` or `noop`.
    pub provider: String,
    pub url: Option<String>,
    pub index: String,
    pub username: Option<String>,
    pub vector_dim: usize,
    pub knn_space: String,
    /// Create the index lazily on first retrieval.
    pub ensure_index: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "noop".into(),
            url: None,
            index: "tariff_fragments".into(),
            username: None,
            vector_dim: 768,
            knn_space: "cosinesimil".into(),
            ensure_index: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `gemini`, `openai` or `noop`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "text-embedding-004".into(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// `gemini`, `openai` or `noop`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub max_candidates: usize,
    pub max_prompt_snippets: usize,
    pub snippet_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-2.0-flash".into(),
            base_url: None,
            temperature: 0.3,
            max_output_tokens: 2048,
            max_candidates: 3,
            max_prompt_snippets: 5,
            snippet_chars: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// `azure` or `noop`.
    pub provider: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub api_version: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: "noop".into(),
            endpoint: None,
            model: "prebuilt-layout".into(),
            api_version: "2024-11-30".into(),
            poll_interval_ms: 1000,
            max_polls: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Reciprocal Rank Fusion over keyword and vector rankings.
    #[default]
    Rrf,
    /// Vector results when present, keyword results otherwise.
    PreferVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub fusion: FusionPolicy,
    pub rrf_k: f32,
    /// Retrieval depth as a multiple of `top_k`, leaving room for the gate.
    pub depth_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fusion: FusionPolicy::Rrf,
            rrf_k: 60.0,
            depth_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub min_evidence: usize,
    pub min_score: f32,
    pub min_query_chars: usize,
    pub min_query_words: usize,
    pub max_query_chars: usize,
    pub rejected_preview: usize,
    pub max_top_k: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_evidence: 2,
            min_score: 0.35,
            min_query_chars: 10,
            min_query_words: 2,
            max_query_chars: 4000,
            rejected_preview: 3,
            max_top_k: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_ms: u64,
    pub embedding_ms: u64,
    pub generation_ms: u64,
    pub ocr_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_ms: 5_000,
            embedding_ms: 10_000,
            generation_ms: 60_000,
            ocr_ms: 90_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub hs_edition: String,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            hs_edition: "HS_2022".into(),
        }
    }
}

/// Loads the TOML file (or `config/default` when present) and overlays
/// `TARIFF__SECTION__KEY` environment variables.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("TARIFF")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
