//! Classification orchestrator.
//!
//! Stages run in a fixed order and every terminal state yields a well-formed
//! [`ClassificationResult`]. Only a malformed request is reported as an error.

use crate::config::GuardrailConfig;
use crate::error::{ClassifyError, RequestError};
use crate::extractor::{merge_query, Attachment, TextExtractor};
use crate::gate::{gate, missing_attribute_prompts};
use crate::generation::{GenerationContract, GenerationOutput};
use crate::models::{
    Candidate, ClassificationResult, DebugInfo, EvidenceItem, EvidenceReason, VersionInfo,
    EXCLUSIVE_MARKERS, WARNING_EVIDENCE_INSUFFICIENT, WARNING_NO_CANDIDATES,
    WARNING_OUT_OF_SCOPE, WARNING_QUERY_TOO_SHORT, WARNING_RETRIEVAL_FAILED,
    WARNING_VALIDATION_FAILED,
};
use crate::prompts::truncate_chars;
use crate::retriever::{FusionRetriever, RetrievalReport};
use crate::rules::RuleEngine;
use crate::screening::{self, Screen, Screener};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, info, warn};

static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4,10}(\.\d{2})*$").expect("candidate code pattern compiles")
});

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone)]
pub struct ClassifyRequest {
    pub text: Option<String>,
    pub file: Option<Attachment>,
    pub top_k: usize,
    pub debug: bool,
}

impl ClassifyRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file: None,
            top_k: DEFAULT_TOP_K,
            debug: false,
        }
    }

    pub fn with_file(mut self, file: Attachment) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ocr,
    Screen,
    Retrieve,
    Gate,
    Generate,
    ValidateOutput,
    Assemble,
    QueryTooShort,
    OutOfScope,
    EvidenceInsufficient,
    ValidationFailed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ocr => "ocr",
            Stage::Screen => "screen",
            Stage::Retrieve => "retrieve",
            Stage::Gate => "gate",
            Stage::Generate => "generate",
            Stage::ValidateOutput => "validate_output",
            Stage::Assemble => "assemble",
            Stage::QueryTooShort => "query_too_short",
            Stage::OutOfScope => "out_of_scope",
            Stage::EvidenceInsufficient => "evidence_insufficient",
            Stage::ValidationFailed => "validation_failed",
        }
    }
}

/// Per-run diagnostics, attached only when the caller asked for them.
struct Trace {
    started: Instant,
    info: Option<DebugInfo>,
}

impl Trace {
    fn new(enabled: bool) -> Self {
        Self {
            started: Instant::now(),
            info: enabled.then(DebugInfo::default),
        }
    }

    fn stage(&mut self, stage: Stage) {
        debug!(stage = stage.as_str(), "classification stage");
        if let Some(info) = &mut self.info {
            info.stages.push(stage.as_str().to_string());
        }
    }

    fn record(&mut self, f: impl FnOnce(&mut DebugInfo)) {
        if let Some(info) = &mut self.info {
            f(info);
        }
    }

    fn record_retrieval(&mut self, report: &RetrievalReport, fusion: &str) {
        self.record(|info| {
            info.retrieved_count = report.hits.len();
            info.top_scores = report.hits.iter().take(5).map(|h| h.score).collect();
            info.keyword_hits = report.keyword.hits();
            info.vector_hits = report.vector.hits();
            info.keyword_error = report.keyword.error().map(str::to_string);
            info.vector_error = report.vector.error().map(str::to_string);
            info.fusion = Some(fusion.to_string());
        });
    }

    fn finish(mut self, mut result: ClassificationResult) -> ClassificationResult {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.record(|info| info.elapsed_ms = elapsed);
        result.debug_info = self.info;
        result
    }
}

pub struct Classifier {
    retriever: FusionRetriever,
    generation: GenerationContract,
    extractor: Option<TextExtractor>,
    screener: Screener,
    rules: RuleEngine,
    guardrails: GuardrailConfig,
    depth_multiplier: usize,
    max_candidates: usize,
    hs_edition: String,
}

impl Classifier {
    pub fn new(
        retriever: FusionRetriever,
        generation: GenerationContract,
        guardrails: GuardrailConfig,
    ) -> Self {
        Self {
            retriever,
            generation,
            extractor: None,
            screener: Screener::new(guardrails.min_query_chars, guardrails.min_query_words),
            rules: RuleEngine::default(),
            guardrails,
            depth_multiplier: 2,
            max_candidates: 3,
            hs_edition: "HS_2022".into(),
        }
    }

    pub fn with_extractor(mut self, extractor: TextExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_depth_multiplier(mut self, multiplier: usize) -> Self {
        self.depth_multiplier = multiplier.max(1);
        self
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max.max(1);
        self
    }

    pub fn with_hs_edition(mut self, edition: &str) -> Self {
        self.hs_edition = edition.to_string();
        self
    }

    pub fn retriever(&self) -> &FusionRetriever {
        &self.retriever
    }

    pub fn validate(&self, req: &ClassifyRequest) -> Result<(), RequestError> {
        let text = req.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() && req.file.is_none() {
            return Err(RequestError::MissingQuery);
        }
        let len = text.chars().count();
        if len > self.guardrails.max_query_chars {
            return Err(RequestError::QueryTooLong {
                len,
                max: self.guardrails.max_query_chars,
            });
        }
        if req.top_k == 0 || req.top_k > self.guardrails.max_top_k {
            return Err(RequestError::TopKOutOfRange {
                got: req.top_k,
                max: self.guardrails.max_top_k,
            });
        }
        Ok(())
    }

    pub async fn classify(&self, req: &ClassifyRequest) -> Result<ClassificationResult, ClassifyError> {
        self.validate(req)?;
        let mut trace = Trace::new(req.debug);

        let extracted = match &req.file {
            Some(file) => {
                trace.stage(Stage::Ocr);
                self.extract(file).await
            }
            None => None,
        };
        trace.record(|info| info.ocr_chars = extracted.as_ref().map(|t| t.chars().count()));
        let merged = merge_query(req.text.as_deref(), extracted.as_deref());
        let query = truncate_chars(&merged, self.guardrails.max_query_chars);

        trace.stage(Stage::Screen);
        match self.screener.screen(query) {
            Screen::Accept => {}
            Screen::TooShort => {
                trace.stage(Stage::QueryTooShort);
                let result = ClassificationResult::rejected(
                    Vec::new(),
                    vec![screening::too_short_message(
                        self.guardrails.min_query_chars,
                        self.guardrails.min_query_words,
                    )],
                    vec![WARNING_QUERY_TOO_SHORT.to_string()],
                );
                return Ok(trace.finish(self.terminal(result)));
            }
            Screen::OutOfScope(pattern) => {
                info!(%pattern, "query screened out of scope");
                trace.stage(Stage::OutOfScope);
                let result = ClassificationResult::rejected(
                    Vec::new(),
                    vec![screening::out_of_scope_message()],
                    vec![WARNING_OUT_OF_SCOPE.to_string()],
                );
                return Ok(trace.finish(self.terminal(result)));
            }
        }

        trace.stage(Stage::Retrieve);
        let depth = req.top_k.saturating_mul(self.depth_multiplier);
        let report = self.retriever.retrieve_with_report(query, depth).await;
        let fusion = format!("{:?}", self.retriever.policy());
        trace.record_retrieval(&report, &fusion);

        trace.stage(Stage::Gate);
        let decision = gate(
            &report.hits,
            self.guardrails.min_evidence,
            self.guardrails.min_score,
            self.guardrails.rejected_preview,
        );
        trace.record(|info| info.valid_count = decision.valid_hits.len());
        if !decision.pass {
            info!(
                retrieved = report.hits.len(),
                valid = decision.valid_hits.len(),
                "evidence insufficient"
            );
            trace.stage(Stage::EvidenceInsufficient);
            let mut warnings = vec![WARNING_EVIDENCE_INSUFFICIENT.to_string()];
            if report.backend_unreachable() {
                warnings.push(WARNING_RETRIEVAL_FAILED.to_string());
            }
            let result = ClassificationResult::rejected(
                decision
                    .rejected_preview
                    .iter()
                    .map(|h| EvidenceItem::from_hit(h, EvidenceReason::ScoreTooLow))
                    .collect(),
                missing_attribute_prompts(query),
                warnings,
            );
            return Ok(trace.finish(self.terminal(result)));
        }

        trace.stage(Stage::Generate);
        let max_candidates = req.top_k.min(self.max_candidates);
        let evidence: Vec<_> = decision.valid_hits.into_iter().take(req.top_k).collect();
        let mut output = self.generation.generate(query, &evidence, max_candidates).await;
        if output.unknown_citations > 0 {
            debug!(count = output.unknown_citations, "discarded citations of unknown fragments");
        }

        trace.stage(Stage::ValidateOutput);
        let proposed = output.candidates.len();
        let (valid, invalid) = validate_candidates(std::mem::take(&mut output.candidates));
        trace.record(|info| info.dropped_candidates = invalid.len());
        if proposed > 0 && valid.is_empty() {
            warn!(?invalid, "every proposed candidate has an invalid code");
            trace.stage(Stage::ValidationFailed);
            let mut missing = output.missing_fields;
            if missing.is_empty() {
                missing = missing_attribute_prompts(query);
            }
            let mut result = ClassificationResult::rejected(
                output.evidence,
                missing,
                vec![WARNING_VALIDATION_FAILED.to_string()],
            );
            result.version_info = output.version_info;
            return Ok(trace.finish(self.with_versions(result)));
        }
        for code in &invalid {
            output
                .warnings
                .push(format!("dropped candidate with invalid code '{code}'"));
        }
        output.candidates = valid;
        output.candidates.truncate(max_candidates);

        trace.stage(Stage::Assemble);
        let result = self.assemble(query, output);
        info!(
            candidates = result.candidates.len(),
            warnings = result.warnings.len(),
            "classification finished"
        );
        Ok(trace.finish(result))
    }

    async fn extract(&self, file: &Attachment) -> Option<String> {
        let Some(extractor) = &self.extractor else {
            warn!(name = %file.name, "no text extractor configured, ignoring attachment");
            return None;
        };
        match extractor.extract(file).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => {
                warn!(name = %file.name, "attachment produced no text");
                None
            }
            Err(e) => {
                warn!(name = %file.name, "text extraction failed, continuing without it: {e:#}");
                None
            }
        }
    }

    fn assemble(&self, query: &str, output: GenerationOutput) -> ClassificationResult {
        let mut result: ClassificationResult = output.into();
        self.rules.apply(query, &mut result);
        if result.candidates.is_empty() {
            if result.missing_fields.is_empty() {
                result.missing_fields = missing_attribute_prompts(query);
            }
            if result.warnings.is_empty() {
                result.warnings.push(WARNING_NO_CANDIDATES.to_string());
            }
        } else {
            result
                .warnings
                .retain(|w| !EXCLUSIVE_MARKERS.contains(&w.as_str()));
        }
        self.with_versions(result)
    }

    /// Version info for results that never reached the generator.
    fn terminal(&self, mut result: ClassificationResult) -> ClassificationResult {
        result.version_info = VersionInfo {
            hs_edition: self.hs_edition.clone(),
            ..Default::default()
        };
        self.with_versions(result)
    }

    fn with_versions(&self, mut result: ClassificationResult) -> ClassificationResult {
        result.version_info.index = Some(self.retriever.backend().index_name().to_string());
        result
    }
}

/// Splits candidates into valid ones (whitespace removed, ordered by
/// confidence) and the codes that failed the pattern.
pub fn validate_candidates(candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<String>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for mut candidate in candidates {
        let code: String = candidate.code.chars().filter(|c| !c.is_whitespace()).collect();
        if CODE_PATTERN.is_match(&code) {
            candidate.code = code;
            valid.push(candidate);
        } else {
            invalid.push(candidate.code);
        }
    }
    valid.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    (valid, invalid)
}
