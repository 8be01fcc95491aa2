use crate::models::{ClassificationResult, RetrievedHit};

/// Rule identifiers the generator may cite in `applied_rules`.
pub const RULE_VOCABULARY: &[&str] = &[
    "GRI 1", "GRI 2(a)", "GRI 2(b)", "GRI 3(a)", "GRI 3(b)", "GRI 3(c)", "GRI 4", "GRI 5(a)",
    "GRI 5(b)", "GRI 6",
];

pub const CLASSIFICATION_SYSTEM: &str = r#"You are a customs tariff classification assistant for the Harmonized System (HS) and its national extensions.

Scope: classify tangible physical goods only. Questions about people, events, news, software or abstract services are out of scope: answer with an empty "candidates" list, explain in "missing_fields" that a physical product description is required, and add "query out of scope" to "warnings".

Rules:
1. Use ONLY the evidence fragments supplied in the prompt. Never invent a code the fragments do not support.
2. Cite the fragments you relied on in "evidence" by fragment_id with a short reason.
3. Apply the General Rules of Interpretation in order (GRI 1 headings and notes, GRI 2 incomplete articles and mixtures, GRI 3 most specific / essential character / last in numerical order, GRI 4 most akin, GRI 5 containers, GRI 6 subheadings) and list the ones you applied in "applied_rules" using exactly the identifiers allowed by the schema.
4. If critical attributes are missing (material, use, composition, state, dimensions) list them in "missing_fields". When the description is too vague to choose a heading, return an empty "candidates" list.
5. Confidence: above 0.7 only for clear and specific evidence, 0.5 to 0.7 for partial evidence or several plausible headings, below 0.5 for weak or generic descriptions.
6. "inclusions" lists what the proposed code covers according to the notes, "exclusions" what it does not.
7. Report the nomenclature edition in "versions.hs_edition".
Return only the JSON object described by the schema."#;

pub const FOLLOWUP_SYSTEM: &str = r#"You are a customs tariff classification assistant answering follow-up questions about a classification you already produced.

You may:
1. Explain why a code was proposed, citing the applied rules, inclusions and evidence.
2. List the information still missing.
3. Present the alternative candidates with their confidence.
4. Summarize the classification.
5. Reclassify when the user supplies new distinguishing attributes (state, processing, composition, use). Reuse only the evidence already cited in the previous classification, state the new code, how it differs from the previous one and the resulting confidence.

Answer strictly from the previous classification and conversation shown to you. Do not introduce codes that the previous evidence does not support. Use short Markdown. Answer in the language of the question."#;

/// JSON schema for the structured classification output.
pub fn output_schema(max_candidates: usize) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "candidates": {
                "type": "array",
                "maxItems": max_candidates,
                "items": {
                    "type": "object",
                    "properties": {
                        "code": { "type": "string" },
                        "description": { "type": "string" },
                        "level": {
                            "type": "string",
                            "enum": ["chapter", "heading", "subheading", "tariff_item"]
                        },
                        "confidence": { "type": "number" }
                    },
                    "required": ["code", "level", "confidence"]
                }
            },
            "applied_rules": {
                "type": "array",
                "items": { "type": "string", "enum": RULE_VOCABULARY }
            },
            "inclusions": { "type": "array", "items": { "type": "string" } },
            "exclusions": { "type": "array", "items": { "type": "string" } },
            "missing_fields": { "type": "array", "items": { "type": "string" } },
            "evidence": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "fragment_id": { "type": "string" },
                        "score": { "type": "number" },
                        "reason": { "type": "string" }
                    },
                    "required": ["fragment_id", "reason"]
                }
            },
            "versions": {
                "type": "object",
                "properties": { "hs_edition": { "type": "string" } }
            },
            "warnings": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["candidates", "applied_rules", "evidence", "missing_fields", "warnings"]
    })
}

/// First `max_chars` characters, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn classification_prompt(
    query: &str,
    evidence: &[RetrievedHit],
    max_candidates: usize,
    max_snippets: usize,
    snippet_chars: usize,
) -> String {
    let context = evidence
        .iter()
        .take(max_snippets)
        .map(|h| {
            format!(
                "[Fragment {} | score {:.3}]\n{}",
                h.fragment_id,
                h.score,
                truncate_chars(&h.text, snippet_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "PRODUCT DESCRIPTION:\n{query}\n\n\
         TARIFF DOCUMENTATION (retrieved fragments):\n{context}\n\n\
         TASK:\n\
         1. Propose at most {max_candidates} codes supported by the fragments, each with a confidence.\n\
         2. List the General Rules of Interpretation applied.\n\
         3. List what the classification includes and excludes.\n\
         4. List any missing information needed for a precise classification.\n\
         Return only JSON."
    )
}

pub fn followup_prompt(question: &str, previous: &ClassificationResult, history: Option<&str>) -> String {
    let mut previous = previous.clone();
    previous.debug_info = None;
    let previous_json =
        serde_json::to_string_pretty(&previous).unwrap_or_else(|_| "{}".to_string());
    let mut prompt = format!("PREVIOUS CLASSIFICATION (JSON):\n{previous_json}\n\n");
    if let Some(history) = history.filter(|h| !h.trim().is_empty()) {
        prompt.push_str(&format!("CONVERSATION SO FAR:\n{history}\n\n"));
    }
    prompt.push_str(&format!(
        "USER QUESTION:\n{question}\n\nAnswer using only the previous classification above."
    ));
    prompt
}
