//! Markdown rendering for terminal output.

use tariff_core::models::{ClassificationResult, EvidenceItem, RetrievedHit};
use tariff_core::prompts::truncate_chars;
use tariff_core::retriever::{RetrievalReport, SourceStatus};

const SNIPPET_CHARS: usize = 160;

pub fn confidence_band(confidence: f64) -> &'static str {
    if confidence > 0.7 {
        "high"
    } else if confidence >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

fn section(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n**{title}**\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate_chars(&flat, SNIPPET_CHARS);
    if cut.len() < flat.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}

fn evidence_lines(items: &[EvidenceItem]) -> Vec<String> {
    items
        .iter()
        .map(|e| format!("`{}` ({:.2}) {}", e.fragment_id, e.score, snippet(&e.text)))
        .collect()
}

pub fn render_result(result: &ClassificationResult) -> String {
    let mut out = String::from("### Classification\n");
    if result.candidates.is_empty() {
        out.push_str("\nNo code proposed.\n");
    } else {
        for (i, c) in result.candidates.iter().enumerate() {
            out.push_str(&format!(
                "{}. **{}** {:.0}% ({}) {}\n",
                i + 1,
                c.code,
                c.confidence * 100.0,
                confidence_band(c.confidence),
                c.description
            ));
        }
    }
    section(&mut out, "Rules applied", &result.applied_rules);
    section(&mut out, "Includes", &result.inclusions);
    section(&mut out, "Excludes", &result.exclusions);
    section(&mut out, "Missing information", &result.missing_fields);
    section(&mut out, "Warnings", &result.warnings);
    section(&mut out, "Evidence", &evidence_lines(&result.evidence));
    out.push_str(&format!(
        "\n_{} | pipeline {}{}_\n",
        result.version_info.hs_edition,
        result.version_info.pipeline,
        result
            .version_info
            .model
            .as_deref()
            .map(|m| format!(" | model {m}"))
            .unwrap_or_default()
    ));
    out
}

fn status_line(name: &str, status: &SourceStatus) -> String {
    match status {
        SourceStatus::Hits(n) => format!("{name}: {n} hit(s)"),
        SourceStatus::Skipped => format!("{name}: skipped"),
        SourceStatus::Failed(e) => format!("{name}: failed ({e})"),
    }
}

fn hit_line(i: usize, hit: &RetrievedHit) -> String {
    format!("{}. `{}` {:.3} {}\n", i + 1, hit.fragment_id, hit.score, snippet(&hit.text))
}

pub fn render_report(report: &RetrievalReport) -> String {
    let mut out = format!(
        "### Retrieval\n\n{}; {}\n\n",
        status_line("keyword", &report.keyword),
        status_line("vector", &report.vector)
    );
    if report.hits.is_empty() {
        out.push_str("No fragments found.\n");
    }
    for (i, hit) in report.hits.iter().enumerate() {
        out.push_str(&hit_line(i, hit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tariff_core::models::{Candidate, CandidateLevel, EvidenceReason};

    #[test]
    fn bands() {
        assert_eq!(confidence_band(0.9), "high");
        assert_eq!(confidence_band(0.7), "medium");
        assert_eq!(confidence_band(0.2), "low");
    }

    #[test]
    fn renders_candidates_and_sections() {
        let result = ClassificationResult {
            candidates: vec![Candidate {
                code: "4011.10".into(),
                description: "car tyres".into(),
                confidence: 0.86,
                level: CandidateLevel::Subheading,
            }],
            applied_rules: vec!["GRI 1".into()],
            evidence: vec![EvidenceItem {
                fragment_id: "f1".into(),
                score: 0.9,
                text: "New pneumatic\n tyres".into(),
                reason: EvidenceReason::RetrievedBySearch,
                doc_id: None,
                bucket: None,
            }],
            ..Default::default()
        };
        let md = render_result(&result);
        assert!(md.contains("1. **4011.10** 86% (high) car tyres"));
        assert!(md.contains("**Rules applied**\n- GRI 1"));
        assert!(md.contains("`f1` (0.90) New pneumatic tyres"));
        assert!(!md.contains("**Warnings**"));
    }

    #[test]
    fn empty_result_says_so() {
        let result = ClassificationResult {
            missing_fields: vec!["Material".into()],
            warnings: vec!["evidence insufficient".into()],
            ..Default::default()
        };
        let md = render_result(&result);
        assert!(md.contains("No code proposed."));
        assert!(md.contains("- Material"));
        assert!(md.contains("- evidence insufficient"));
    }
}
