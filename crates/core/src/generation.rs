//! Structured generation contract.
//!
//! Whatever the generation service does (refuse, time out, answer with prose,
//! omit fields), [`GenerationContract::generate`] returns a well-formed
//! [`GenerationOutput`]. Failures collapse into the offline result.

use crate::models::{
    Candidate, CandidateLevel, ClassificationResult, EvidenceItem, EvidenceReason, RetrievedHit,
    VersionInfo, WARNING_GENERATOR_OFFLINE,
};
use crate::prompts;
use providers::{GenerationRequest, GenerationService, ProviderError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Classification payload produced by the generation stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    pub candidates: Vec<Candidate>,
    pub evidence: Vec<EvidenceItem>,
    pub support_evidence: Vec<EvidenceItem>,
    pub applied_rules: Vec<String>,
    pub inclusions: Vec<String>,
    pub exclusions: Vec<String>,
    pub missing_fields: Vec<String>,
    pub warnings: Vec<String>,
    pub version_info: VersionInfo,
    /// Set when this is the offline fallback; holds the cause.
    pub offline_reason: Option<String>,
    /// Citations echoed by the model that matched no retrieved fragment.
    pub unknown_citations: usize,
}

impl GenerationOutput {
    /// Deterministic stand-in used whenever the generator cannot be used.
    pub fn offline(evidence: &[RetrievedHit], reason: &str) -> Self {
        Self {
            evidence: evidence
                .iter()
                .map(|h| EvidenceItem::from_hit(h, EvidenceReason::RetrievedBySearch))
                .collect(),
            missing_fields: vec![format!(
                "The classification generator is unavailable ({reason}); no code can be proposed without it."
            )],
            warnings: vec![WARNING_GENERATOR_OFFLINE.to_string()],
            offline_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline_reason.is_some()
    }
}

impl From<GenerationOutput> for ClassificationResult {
    fn from(out: GenerationOutput) -> Self {
        Self {
            candidates: out.candidates,
            evidence: out.evidence,
            support_evidence: out.support_evidence,
            applied_rules: out.applied_rules,
            inclusions: out.inclusions,
            exclusions: out.exclusions,
            missing_fields: out.missing_fields,
            warnings: out.warnings,
            version_info: out.version_info,
            debug_info: None,
        }
    }
}

/// Loosely-typed model output. Every field tolerates absence and `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawOutput {
    #[serde(alias = "top_candidates")]
    pub candidates: Value,
    pub evidence: Value,
    #[serde(alias = "applied_rgi")]
    pub applied_rules: Value,
    pub inclusions: Value,
    pub exclusions: Value,
    pub missing_fields: Value,
    pub warnings: Value,
    #[serde(alias = "version_info")]
    pub versions: Value,
}

/// Removes a surrounding Markdown code fence (with optional language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the language tag, if any, up to the end of the opening line.
        body = match rest.find('\n') {
            Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[nl + 1..]
            }
            _ => rest,
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Direct parse, then one retry with code fences stripped.
pub fn parse_raw_output(text: &str) -> Result<RawOutput, serde_json::Error> {
    let value = match serde_json::from_str::<Value>(text.trim()) {
        Ok(v) => v,
        Err(_) => serde_json::from_str::<Value>(strip_code_fences(text))?,
    };
    if !value.is_object() {
        return Err(serde::de::Error::custom("generation output is not a JSON object"));
    }
    serde_json::from_value(value)
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Numbers or numeric strings (`"85%"` reads as 0.85); anything else, or a
/// non-finite value, is 0.0. The result is clamped into `[0, 1]`.
pub fn coerce_confidence(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().map(|p| p / 100.0).unwrap_or(0.0),
                None => s.parse::<f64>().unwrap_or(0.0),
            }
        }
        _ => 0.0,
    };
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn candidate_from_value(value: &Value) -> Option<Candidate> {
    let obj = value.as_object()?;
    let code = match obj.get("code").or_else(|| obj.get("hs_code"))? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if code.is_empty() {
        return None;
    }
    let level = obj
        .get("level")
        .and_then(Value::as_str)
        .and_then(CandidateLevel::parse_label)
        .unwrap_or_else(|| CandidateLevel::from_code(&code));
    Some(Candidate {
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        confidence: coerce_confidence(obj.get("confidence")),
        level,
        code,
    })
}

/// Applies defaults and binds the model's citations to the retrieved hits.
pub fn normalize(raw: RawOutput, hits: &[RetrievedHit], hs_edition: &str) -> GenerationOutput {
    let candidates: Vec<Candidate> = match &raw.candidates {
        Value::Array(items) => items.iter().filter_map(candidate_from_value).collect(),
        _ => Vec::new(),
    };

    let mut cited: Vec<&RetrievedHit> = Vec::new();
    let mut unknown_citations = 0;
    let mut seen = HashSet::new();
    if let Value::Array(items) = &raw.evidence {
        for item in items {
            let Some(id) = item.get("fragment_id").and_then(Value::as_str) else {
                unknown_citations += 1;
                continue;
            };
            match hits.iter().find(|h| h.fragment_id == id) {
                Some(hit) => {
                    if seen.insert(id.to_string()) {
                        cited.push(hit);
                    }
                }
                None => unknown_citations += 1,
            }
        }
    }

    let evidence: Vec<EvidenceItem> = if cited.is_empty() {
        hits.iter()
            .map(|h| EvidenceItem::from_hit(h, EvidenceReason::RetrievedBySearch))
            .collect()
    } else {
        cited
            .iter()
            .map(|h| EvidenceItem::from_hit(h, EvidenceReason::RetrievedBySearch))
            .collect()
    };
    let support_evidence = if candidates.is_empty() {
        Vec::new()
    } else {
        cited
            .iter()
            .map(|h| EvidenceItem::from_hit(h, EvidenceReason::SupportForCode))
            .collect()
    };

    let hs_edition = raw
        .versions
        .get("hs_edition")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(hs_edition)
        .to_string();

    GenerationOutput {
        candidates,
        evidence,
        support_evidence,
        applied_rules: string_list(&raw.applied_rules),
        inclusions: string_list(&raw.inclusions),
        exclusions: string_list(&raw.exclusions),
        missing_fields: string_list(&raw.missing_fields),
        warnings: string_list(&raw.warnings),
        version_info: VersionInfo {
            hs_edition,
            ..Default::default()
        },
        offline_reason: None,
        unknown_citations,
    }
}

pub struct GenerationContract {
    service: Arc<dyn GenerationService>,
    max_snippets: usize,
    snippet_chars: usize,
    temperature: f32,
    max_output_tokens: u32,
    timeout: Duration,
    hs_edition: String,
}

impl GenerationContract {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            max_snippets: 5,
            snippet_chars: 600,
            temperature: 0.3,
            max_output_tokens: 2048,
            timeout: Duration::from_secs(60),
            hs_edition: "HS_2022".into(),
        }
    }

    pub fn with_snippets(mut self, max_snippets: usize, snippet_chars: usize) -> Self {
        self.max_snippets = max_snippets.max(1);
        self.snippet_chars = snippet_chars.max(1);
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_hs_edition(mut self, edition: &str) -> Self {
        self.hs_edition = edition.to_string();
        self
    }

    pub fn model(&self) -> &str {
        self.service.model()
    }

    pub async fn generate(
        &self,
        query: &str,
        evidence: &[RetrievedHit],
        max_candidates: usize,
    ) -> GenerationOutput {
        let prompt = prompts::classification_prompt(
            query,
            evidence,
            max_candidates,
            self.max_snippets,
            self.snippet_chars,
        );
        let schema = prompts::output_schema(max_candidates);
        let request = GenerationRequest::new(&prompt)
            .with_system(prompts::CLASSIFICATION_SYSTEM)
            .with_schema(&schema)
            .with_limits(self.temperature, self.max_output_tokens);

        let text = match tokio::time::timeout(self.timeout, self.service.generate(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                let reason = match &e {
                    ProviderError::NotConfigured(_) => {
                        "missing credentials or configuration".to_string()
                    }
                    ProviderError::Blocked(r) => format!("response blocked: {r}"),
                    ProviderError::EmptyResponse => "empty response".to_string(),
                    other => other.to_string(),
                };
                warn!("generation failed, returning offline result: {e}");
                return self.offline(evidence, &reason);
            }
            Err(_) => {
                warn!("generation timed out after {:?}", self.timeout);
                return self.offline(evidence, "generation timed out");
            }
        };

        match parse_raw_output(&text) {
            Ok(raw) => {
                let mut out = normalize(raw, evidence, &self.hs_edition);
                out.version_info.model = Some(self.service.model().to_string());
                info!(candidates = out.candidates.len(), "generation produced output");
                out
            }
            Err(e) => {
                warn!("generation output is not valid JSON: {e}");
                self.offline(evidence, "malformed generation output")
            }
        }
    }

    fn offline(&self, evidence: &[RetrievedHit], reason: &str) -> GenerationOutput {
        let mut out = GenerationOutput::offline(evidence, reason);
        out.version_info.hs_edition = self.hs_edition.clone();
        out
    }
}
