//! Answers questions about a classification already produced.
//!
//! No retrieval happens here: the previous result is the only evidence.

use crate::models::ClassificationResult;
use crate::prompts;
use providers::{GenerationRequest, GenerationService};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::warn;

pub const NO_PRIOR_CLASSIFICATION: &str =
    "There is no previous classification in this conversation. Describe the product to classify first.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowupIntent {
    Explain,
    Missing,
    Alternatives,
    Summary,
    Other,
}

const EXPLAIN_KEYWORDS: &[&str] = &[
    "por qué", "porque", "razón", "justifica", "explica", "why", "explain", "reason", "justify",
];
const MISSING_KEYWORDS: &[&str] = &[
    "qué falta", "falta", "faltante", "información adicional", "más detalles", "detalles",
    "missing", "what else", "more detail",
];
const ALTERNATIVE_KEYWORDS: &[&str] = &[
    "alternativa", "otro código", "otras opciones", "alternative", "other code", "other option",
];
const SUMMARY_KEYWORDS: &[&str] = &[
    "resumen", "resume", "sintetiza", "simplifica", "summary", "summarize", "summarise", "tl;dr",
];

impl FollowupIntent {
    pub fn detect(question: &str) -> Self {
        let q = question.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| q.contains(k));
        if has(EXPLAIN_KEYWORDS) {
            FollowupIntent::Explain
        } else if has(MISSING_KEYWORDS) {
            FollowupIntent::Missing
        } else if has(ALTERNATIVE_KEYWORDS) {
            FollowupIntent::Alternatives
        } else if has(SUMMARY_KEYWORDS) {
            FollowupIntent::Summary
        } else {
            FollowupIntent::Other
        }
    }
}

/// Deterministic answer built only from the previous result's fields.
pub fn fallback_answer(question: &str, previous: Option<&ClassificationResult>) -> String {
    let Some(previous) = previous else {
        return NO_PRIOR_CLASSIFICATION.to_string();
    };
    match FollowupIntent::detect(question) {
        FollowupIntent::Explain => {
            let mut parts = Vec::new();
            if let Some(top) = previous.top_candidate() {
                parts.push(format!("The main code **{}** was proposed.", top.code));
            }
            if !previous.applied_rules.is_empty() {
                parts.push(format!("Rules applied: {}.", previous.applied_rules.join(", ")));
            }
            if !previous.inclusions.is_empty() {
                parts.push(format!("Includes:\n{}", bullets(&previous.inclusions)));
            }
            if !previous.exclusions.is_empty() {
                parts.push(format!("Excludes:\n{}", bullets(&previous.exclusions)));
            }
            if parts.is_empty() {
                parts.push("The previous result gives no rationale beyond its evidence.".into());
            }
            format!("### Why this code?\n\n{}", parts.join("\n\n"))
        }
        FollowupIntent::Missing => {
            if previous.missing_fields.is_empty() {
                "No critical information is missing at subheading level; national subdivisions may still need more detail.".to_string()
            } else {
                format!(
                    "### Additional information needed\n\n{}",
                    bullets(&previous.missing_fields)
                )
            }
        }
        FollowupIntent::Alternatives => {
            if previous.candidates.len() > 1 {
                let lines: Vec<String> = previous.candidates[1..]
                    .iter()
                    .map(|c| format!("- {} (confidence {:.0}%)", c.code, c.confidence * 100.0))
                    .collect();
                format!("### Alternative codes\n\n{}", lines.join("\n"))
            } else {
                "There are no alternatives with enough confidence.".to_string()
            }
        }
        FollowupIntent::Summary => match previous.top_candidate() {
            Some(top) => {
                let mut text = format!(
                    "### Summary\n\nRecommended code: {} (confidence {:.0}%).",
                    top.code,
                    top.confidence * 100.0
                );
                if let Some(first) = previous.inclusions.first() {
                    text.push_str(&format!("\n\nMain criterion: {first}"));
                }
                text
            }
            None => format!("### Summary\n\n{}", previous.summary()),
        },
        FollowupIntent::Other => "Ask why the code was chosen, what information is missing, which alternatives exist, or for a summary.".to_string(),
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

static ATTRIBUTE_ANSWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(tipo de veh[ií]culo|es una moto(cicleta)?|es un autom[oó]vil|es un cami[oó]n|transporte de (personas|mercanc[ií]as)|uso especial|cilindrada|potencia|tipo de motor|gasolina|d[ií]esel|h[ií]brido|el[eé]ctrico|peso( bruto)?|carga [uú]til|completo|incompleto|chasis|cabina|nuev[oa]s?|usad[oa]s?|new|used|electric|diesel|petrol|weight)\b",
    )
    .expect("attribute answer pattern compiles")
});

const EXPLICIT_FOLLOWUP: &[&str] = &[
    "traduc", "inglés", "español", "translate", "otras opciones", "información falta",
    "campos faltantes",
];

/// Words that open an answer or a question rather than a product name.
const LEADING_CONNECTORS: &[&str] = &[
    "para", "como", "cómo", "cual", "cuál", "cuales", "cuáles", "donde", "dónde", "pero",
    "sólo", "solo", "sobre", "también", "tambien", "with", "what", "which", "made", "that",
    "this", "they", "only", "also", "from", "used", "está", "esta", "esto", "este", "pues",
    "bueno", "vale", "sirve", "tiene", "tienen", "hecho", "hecha", "hechos", "hechas",
];

/// A message of three or more words whose first word is a noun absent from the
/// previous query describes a different product.
fn names_new_product(message: &str, last_query: Option<&str>) -> bool {
    if message.contains('?') || message.contains('¿') {
        return false;
    }
    let lower = message.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let Some(head) = words.first() else {
        return false;
    };
    if words.len() < 3
        || head.chars().count() < 4
        || !head.chars().all(char::is_alphabetic)
        || LEADING_CONNECTORS.contains(head)
        || ATTRIBUTE_ANSWER.is_match(head)
    {
        return false;
    }
    let previous = last_query.unwrap_or_default().to_lowercase();
    !previous
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == *head)
}

/// Whether a chat message refers to the previous result rather than a new product.
pub fn is_followup_question(
    message: &str,
    last_query: Option<&str>,
    previous: Option<&ClassificationResult>,
) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    let lower = message.trim().to_lowercase();
    if FollowupIntent::detect(&lower) != FollowupIntent::Other
        || EXPLICIT_FOLLOWUP.iter().any(|p| lower.contains(p))
    {
        return true;
    }
    if names_new_product(message, last_query) {
        return false;
    }
    if ATTRIBUTE_ANSWER.is_match(&lower) {
        return true;
    }
    // Short replies while fields are outstanding answer those fields.
    !previous.missing_fields.is_empty() && lower.split_whitespace().count() <= 12
}

/// Rewrites a short reply to outstanding missing fields into an explicit
/// reclassification request carrying the original query.
pub fn enrich_followup_question(
    message: &str,
    last_query: Option<&str>,
    previous: &ClassificationResult,
) -> Option<String> {
    if previous.missing_fields.is_empty() || message.split_whitespace().count() > 6 {
        return None;
    }
    Some(format!(
        "The user answered the missing information: '{}'. Fields that were missing: {}. Original product: {}. Reclassify with this new information.",
        message.trim(),
        previous.missing_fields.join(", "),
        last_query.unwrap_or("(unknown)")
    ))
}

pub struct FollowupResponder {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
    temperature: f32,
    max_output_tokens: u32,
}

impl FollowupResponder {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self {
            service,
            timeout: Duration::from_secs(60),
            temperature: 0.3,
            max_output_tokens: 2048,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub async fn answer(
        &self,
        question: &str,
        previous: Option<&ClassificationResult>,
        history: Option<&str>,
    ) -> String {
        let Some(prev) = previous else {
            return NO_PRIOR_CLASSIFICATION.to_string();
        };
        let prompt = prompts::followup_prompt(question, prev, history);
        let request = GenerationRequest::new(&prompt)
            .with_system(prompts::FOLLOWUP_SYSTEM)
            .with_limits(self.temperature, self.max_output_tokens);
        match tokio::time::timeout(self.timeout, self.service.generate(&request)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Ok(_)) => {
                warn!("follow-up generation returned no text, answering from the previous result");
                fallback_answer(question, previous)
            }
            Ok(Err(e)) => {
                warn!("follow-up generation failed, answering from the previous result: {e}");
                fallback_answer(question, previous)
            }
            Err(_) => {
                warn!("follow-up generation timed out after {:?}", self.timeout);
                fallback_answer(question, previous)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, CandidateLevel};

    fn previous() -> ClassificationResult {
        ClassificationResult {
            candidates: vec![
                Candidate {
                    code: "4011.10".into(),
                    description: "radial tyres for cars".into(),
                    confidence: 0.82,
                    level: CandidateLevel::Subheading,
                },
                Candidate {
                    code: "4011.20".into(),
                    description: String::new(),
                    confidence: 0.4,
                    level: CandidateLevel::Subheading,
                },
            ],
            applied_rules: vec!["Rule 1".into()],
            inclusions: vec!["X".into()],
            ..Default::default()
        }
    }

    #[test]
    fn intents_in_both_languages() {
        assert_eq!(FollowupIntent::detect("¿Por qué este código?"), FollowupIntent::Explain);
        assert_eq!(FollowupIntent::detect("What is missing?"), FollowupIntent::Missing);
        assert_eq!(FollowupIntent::detect("¿Hay alternativas?"), FollowupIntent::Alternatives);
        assert_eq!(FollowupIntent::detect("Dame un resumen"), FollowupIntent::Summary);
        assert_eq!(FollowupIntent::detect("hola"), FollowupIntent::Other);
    }

    #[test]
    fn explanation_cites_rules_and_inclusions() {
        let answer = fallback_answer("¿por qué este código?", Some(&previous()));
        assert!(answer.contains("Rule 1"));
        assert!(answer.contains("- X"));
    }

    #[test]
    fn alternatives_skip_the_main_code() {
        let answer = fallback_answer("otras opciones", Some(&previous()));
        assert!(answer.contains("4011.20"));
        assert!(!answer.contains("4011.10"));
    }

    #[test]
    fn no_previous_result() {
        assert_eq!(fallback_answer("why?", None), NO_PRIOR_CLASSIFICATION);
        assert!(!is_followup_question("why?", None, None));
    }

    #[test]
    fn short_reply_to_missing_fields_is_enriched() {
        let mut prev = previous();
        prev.missing_fields = vec!["Intended use".into()];
        assert!(is_followup_question("para camiones", Some("neumáticos"), Some(&prev)));
        let enriched = enrich_followup_question("para camiones", Some("neumáticos"), &prev).unwrap();
        assert!(enriched.contains("neumáticos"));
        assert!(enriched.contains("Intended use"));
        assert!(enriched.contains("Reclassify"));
        prev.missing_fields.clear();
        assert!(enrich_followup_question("para camiones", Some("neumáticos"), &prev).is_none());
    }

    #[test]
    fn new_product_is_not_a_followup() {
        let prev = previous();
        assert!(!is_followup_question(
            "Láminas de acero laminadas en caliente de 2 mm de espesor para construcción naval",
            Some("neumáticos"),
            Some(&prev)
        ));
    }

    #[test]
    fn new_product_with_attribute_words_is_not_a_followup() {
        let mut prev = previous();
        prev.missing_fields = vec!["Intended use".into()];
        let last = Some("Neumáticos de caucho sin especificar");
        for message in [
            "Bicicletas eléctricas nuevas de aluminio",
            "Motores diesel usados para generadores",
            "Cajas de cartón new",
        ] {
            assert!(!is_followup_question(message, last, Some(&prev)), "{message}");
        }
        for message in ["nuevos", "para camiones", "de uso agrícola", "neumáticos nuevos para camiones"] {
            assert!(is_followup_question(message, last, Some(&prev)), "{message}");
        }
        assert!(is_followup_question("¿Por qué este código?", last, Some(&prev)));
    }
}
