//! Evidence sufficiency guardrail.

use crate::models::RetrievedHit;

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub pass: bool,
    /// Hits whose relevance clears the threshold, in input order.
    pub valid_hits: Vec<RetrievedHit>,
    /// Top hits shown back to the caller when the gate fails. Empty on pass.
    pub rejected_preview: Vec<RetrievedHit>,
}

/// Passes iff at least `min_count` hits have `relevance >= min_score`. The
/// fused ranking score is ignored here. A failing gate rejects the whole list;
/// its `preview` best-ranked hits are kept for display.
pub fn gate(hits: &[RetrievedHit], min_count: usize, min_score: f32, preview: usize) -> GateDecision {
    let valid_hits: Vec<RetrievedHit> = hits
        .iter()
        .filter(|h| h.relevance >= min_score)
        .cloned()
        .collect();
    let pass = valid_hits.len() >= min_count && !valid_hits.is_empty();
    let rejected_preview = if pass {
        Vec::new()
    } else {
        let mut ranked: Vec<RetrievedHit> = hits.to_vec();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.fragment_id.cmp(&b.fragment_id))
        });
        ranked.truncate(preview);
        ranked
    };
    GateDecision {
        pass,
        valid_hits,
        rejected_preview,
    }
}

/// Attribute groups a product description needs before a code can be defended.
/// Each entry: (prompt shown to the user, words whose presence satisfies it).
const ATTRIBUTE_GROUPS: &[(&str, &[&str])] = &[
    (
        "Material or composition (e.g. steel, plastic, cotton, rubber)",
        &[
            "acero", "steel", "aluminio", "aluminum", "aluminium", "plástico", "plastico",
            "plastic", "madera", "wood", "textil", "textile", "algodón", "algodon", "cotton",
            "cuero", "leather", "vidrio", "glass", "cerámica", "ceramica", "ceramic", "papel",
            "paper", "caucho", "rubber", "hierro", "iron", "cobre", "copper", "resina", "resin",
            "poliéster", "poliester", "polyester", "lana", "wool", "oro", "gold", "plata",
            "silver",
        ],
    ),
    (
        "Intended use or function (what the product is for)",
        &[
            "uso", "use", "para", "for", "industrial", "doméstico", "domestico", "household",
            "médico", "medico", "medical", "agrícola", "agricola", "agricultural", "vehículo",
            "vehiculo", "vehicle", "automóvil", "automovil", "car", "consumo", "consumption",
            "alimentación", "alimentacion", "food",
        ],
    ),
    (
        "Presentation or state (e.g. fresh, frozen, assembled, new, used, bulk)",
        &[
            "fresco", "fresh", "congelado", "frozen", "refrigerado", "chilled", "nuevo", "nuevos",
            "nueva", "nuevas", "new", "usado", "usados", "used", "montado", "assembled",
            "desmontado", "unassembled", "granel", "bulk", "líquido", "liquido", "liquid",
            "polvo", "powder", "laminado", "rolled", "tejido", "woven", "radial", "radiales",
        ],
    ),
];

const SPECIFICATION_PROMPT: &str =
    "Technical specifications (dimensions, capacity, power, weight or model)";

/// Prompts for the attributes the query does not mention. Never empty.
pub fn missing_attribute_prompts(query: &str) -> Vec<String> {
    let words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let mut prompts: Vec<String> = ATTRIBUTE_GROUPS
        .iter()
        .filter(|(_, keywords)| !keywords.iter().any(|k| words.iter().any(|w| w == k)))
        .map(|(prompt, _)| prompt.to_string())
        .collect();
    if !words.iter().any(|w| w.chars().any(|c| c.is_ascii_digit())) {
        prompts.push(SPECIFICATION_PROMPT.to_string());
    }
    if prompts.is_empty() {
        prompts.push(
            "A more specific product description (brand-neutral name, composition and use)"
                .to_string(),
        );
    }
    prompts
}
