use providers::SearchHit;
use serde::{Deserialize, Serialize};

/// Warning markers with pipeline meaning. Callers may match on them exactly.
pub const WARNING_EVIDENCE_INSUFFICIENT: &str = "evidence insufficient";
pub const WARNING_GENERATOR_OFFLINE: &str = "generator offline";
pub const WARNING_QUERY_TOO_SHORT: &str = "query too short";
pub const WARNING_OUT_OF_SCOPE: &str = "query out of scope";
pub const WARNING_VALIDATION_FAILED: &str = "output validation failed";
pub const WARNING_RETRIEVAL_FAILED: &str = "retrieval failed";
pub const WARNING_NO_CANDIDATES: &str = "no classification code is supported by the evidence";

/// Markers that may never accompany a non-empty candidate list.
pub const EXCLUSIVE_MARKERS: &[&str] = &[WARNING_EVIDENCE_INSUFFICIENT, WARNING_GENERATOR_OFFLINE];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedHit {
    pub fragment_id: String,
    /// Ranking score after fusion. Orders hits; not comparable across policies.
    pub score: f32,
    /// Best raw backend score seen for this fragment. The evidence gate
    /// thresholds on this value.
    #[serde(default)]
    pub relevance: f32,
    pub text: String,
    pub bucket: Option<String>,
    pub doc_id: Option<String>,
    pub unit: Option<String>,
}

impl From<SearchHit> for RetrievedHit {
    fn from(hit: SearchHit) -> Self {
        let fragment_id = hit.fragment_id().to_string();
        let bucket = hit.fragment.bucket().map(str::to_string);
        let score = hit.score.max(0.0);
        Self {
            fragment_id,
            score,
            relevance: score,
            text: hit.fragment.text,
            bucket,
            doc_id: hit.fragment.doc_id,
            unit: hit.fragment.unit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceReason {
    RetrievedBySearch,
    ScoreTooLow,
    SupportForCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub fragment_id: String,
    pub score: f32,
    #[serde(default)]
    pub text: String,
    pub reason: EvidenceReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl EvidenceItem {
    pub fn from_hit(hit: &RetrievedHit, reason: EvidenceReason) -> Self {
        Self {
            fragment_id: hit.fragment_id.clone(),
            score: hit.score,
            text: hit.text.clone(),
            reason,
            doc_id: hit.doc_id.clone(),
            bucket: hit.bucket.clone(),
        }
    }
}

/// Granularity of a classification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateLevel {
    Chapter,
    Heading,
    Subheading,
    TariffItem,
}

impl CandidateLevel {
    /// Level implied by the number of digits in a code.
    pub fn from_code(code: &str) -> Self {
        match code.chars().filter(char::is_ascii_digit).count() {
            0..=2 => CandidateLevel::Chapter,
            3..=4 => CandidateLevel::Heading,
            5..=6 => CandidateLevel::Subheading,
            _ => CandidateLevel::TariffItem,
        }
    }

    /// Accepts the labels generators commonly emit (`HS6`, `heading`, `NANDINA8`, ...).
    pub fn parse_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "chapter" | "hs2" | "capitulo" | "capítulo" => Some(CandidateLevel::Chapter),
            "heading" | "hs4" | "partida" => Some(CandidateLevel::Heading),
            "subheading" | "hs6" | "subpartida" => Some(CandidateLevel::Subheading),
            "item" | "tariff_item" | "national" | "national10" | "nandina8" | "hs8" | "hs10"
            | "inciso" => Some(CandidateLevel::TariffItem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub confidence: f64,
    pub level: CandidateLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionInfo {
    pub hs_edition: String,
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            hs_edition: "HS_2022".into(),
            pipeline: env!("CARGO_PKG_VERSION").into(),
            model: None,
            index: None,
        }
    }
}

/// Diagnostics captured when the caller asks for them. Never read by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugInfo {
    pub stages: Vec<String>,
    pub retrieved_count: usize,
    pub valid_count: usize,
    pub top_scores: Vec<f32>,
    pub keyword_hits: Option<usize>,
    pub vector_hits: Option<usize>,
    pub keyword_error: Option<String>,
    pub vector_error: Option<String>,
    pub fusion: Option<String>,
    pub ocr_chars: Option<usize>,
    pub dropped_candidates: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationResult {
    #[serde(alias = "top_candidates")]
    pub candidates: Vec<Candidate>,
    pub evidence: Vec<EvidenceItem>,
    pub support_evidence: Vec<EvidenceItem>,
    #[serde(alias = "applied_rgi")]
    pub applied_rules: Vec<String>,
    pub inclusions: Vec<String>,
    pub exclusions: Vec<String>,
    pub missing_fields: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(alias = "versions")]
    pub version_info: VersionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
}

impl ClassificationResult {
    /// A terminal result without candidates.
    pub fn rejected(
        evidence: Vec<EvidenceItem>,
        missing_fields: Vec<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            evidence,
            missing_fields,
            warnings,
            ..Default::default()
        }
    }

    pub fn has_warning(&self, marker: &str) -> bool {
        self.warnings.iter().any(|w| w == marker)
    }

    pub fn top_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    /// One-line digest used as the assistant turn in conversation history.
    pub fn summary(&self) -> String {
        match self.top_candidate() {
            Some(c) => format!(
                "Suggested code {} ({:.0}% confidence); {} alternative(s); {} missing field(s).",
                c.code,
                c.confidence * 100.0,
                self.candidates.len().saturating_sub(1),
                self.missing_fields.len()
            ),
            None if !self.missing_fields.is_empty() => format!(
                "No code proposed. Missing: {}.",
                self.missing_fields.join("; ")
            ),
            None => format!("No code proposed. {}", self.warnings.join("; ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowupAnswer {
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_from_code_digits() {
        assert_eq!(CandidateLevel::from_code("40"), CandidateLevel::Chapter);
        assert_eq!(CandidateLevel::from_code("4011"), CandidateLevel::Heading);
        assert_eq!(CandidateLevel::from_code("4011.10"), CandidateLevel::Subheading);
        assert_eq!(CandidateLevel::from_code("4011.10.00.10"), CandidateLevel::TariffItem);
    }

    #[test]
    fn level_labels() {
        assert_eq!(CandidateLevel::parse_label("HS6"), Some(CandidateLevel::Subheading));
        assert_eq!(CandidateLevel::parse_label("NANDINA8"), Some(CandidateLevel::TariffItem));
        assert_eq!(CandidateLevel::parse_label("galaxy"), None);
    }

    #[test]
    fn result_accepts_legacy_field_names() {
        let result: ClassificationResult = serde_json::from_value(serde_json::json!({
            "top_candidates": [{ "code": "020712", "confidence": 0.9, "level": "subheading" }],
            "applied_rgi": ["GRI 1"],
            "versions": { "hs_edition": "HS_2017" }
        }))
        .unwrap();
        assert_eq!(result.candidates[0].code, "020712");
        assert_eq!(result.candidates[0].description, "");
        assert_eq!(result.applied_rules, vec!["GRI 1"]);
        assert_eq!(result.version_info.hs_edition, "HS_2017");
    }
}
