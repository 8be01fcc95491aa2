use crate::models::ClassificationResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Any of the words appears in the query (case-insensitive, plural tolerant).
    Keyword { any: Vec<String> },
    AllOf { all: Vec<Condition> },
    AnyOf { any: Vec<Condition> },
    HasCandidates,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ApplyRule { rule: String },
    Warn { message: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub condition: Condition,
    pub actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct RuleContext {
    words: Vec<String>,
    pub has_candidates: bool,
}

impl RuleContext {
    pub fn new(query: &str, has_candidates: bool) -> Self {
        let words = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            words,
            has_candidates,
        }
    }

    fn mentions(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.words.iter().any(|w| {
            w == &keyword
                || w.strip_suffix('s') == Some(keyword.as_str())
                || w.strip_suffix("es") == Some(keyword.as_str())
        })
    }
}

pub fn matches(condition: &Condition, ctx: &RuleContext) -> bool {
    match condition {
        Condition::Keyword { any } => any.iter().any(|k| ctx.mentions(k)),
        Condition::AllOf { all } => all.iter().all(|c| matches(c, ctx)),
        Condition::AnyOf { any } => any.iter().any(|c| matches(c, ctx)),
        Condition::HasCandidates => ctx.has_candidates,
    }
}

pub fn evaluate<'a>(rules: &'a [Rule], ctx: &RuleContext) -> Vec<&'a Rule> {
    let mut matched: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.enabled && matches(&r.condition, ctx))
        .collect();
    matched.sort_by_key(|r| r.priority);
    matched
}

/// Applies a rule's actions, skipping entries already present.
pub fn apply_actions(rule: &Rule, result: &mut ClassificationResult) {
    for action in &rule.actions {
        match action {
            Action::ApplyRule { rule } => push_unique(&mut result.applied_rules, rule),
            Action::Warn { message } => push_unique(&mut result.warnings, message),
        }
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

pub fn builtin_rules() -> Vec<Rule> {
    let keywords = |words: &[&str]| Condition::Keyword {
        any: words.iter().map(|w| w.to_string()).collect(),
    };
    vec![
        Rule {
            name: "sets-put-up-for-retail".into(),
            priority: 10,
            enabled: true,
            condition: Condition::AllOf {
                all: vec![
                    keywords(&["kit", "set", "juego", "conjunto"]),
                    Condition::HasCandidates,
                ],
            },
            actions: vec![Action::ApplyRule {
                rule: "GRI 3(b)".into(),
            }],
        },
        Rule {
            name: "parts-and-accessories".into(),
            priority: 20,
            enabled: true,
            condition: Condition::AllOf {
                all: vec![
                    keywords(&["part", "parte", "partes", "accessory", "accessories", "accesorio"]),
                    Condition::HasCandidates,
                ],
            },
            actions: vec![Action::Warn {
                message: "Review the section and chapter notes on parts and accessories before using this code".into(),
            }],
        },
    ]
}

pub fn load_rules_from_dir(dir: &Path) -> anyhow::Result<Vec<Rule>> {
    let mut rules = Vec::new();
    if !dir.exists() {
        return Ok(rules);
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some("toml")
        {
            paths.push(entry.path());
        }
    }
    paths.sort();
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let rule: Rule = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid rule file {}: {e}", path.display()))?;
        rules.push(rule);
    }
    Ok(rules)
}

/// Ordered rule set evaluated during result assembly.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }
}

impl RuleEngine {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the names of the rules that fired.
    pub fn apply(&self, query: &str, result: &mut ClassificationResult) -> Vec<String> {
        let ctx = RuleContext::new(query, !result.candidates.is_empty());
        let matched = evaluate(&self.rules, &ctx);
        for rule in &matched {
            tracing::debug!(rule = %rule.name, "keyword rule matched");
            apply_actions(rule, result);
        }
        matched.into_iter().map(|r| r.name.clone()).collect()
    }
}
