//! Cheap pre-retrieval checks on the query text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Accept,
    TooShort,
    /// Names the pattern that matched.
    OutOfScope(String),
}

const OFF_TOPIC_PATTERNS: &[&str] = &[
    "quién es",
    "quien es",
    "quiénes son",
    "biografía de",
    "who is",
    "who was",
    "biography of",
    "qué es python",
    "qué es javascript",
    "cómo programar",
    "how to program",
    "write a program",
    "quién ganó",
    "who won",
    "partido de",
    "resultado del",
    "últimas noticias",
    "latest news",
    "qué pasó con",
    "what happened",
    "actualidad",
];

/// People sometimes typed on their own instead of a product.
const FAMOUS_NAMES: &[&str] = &[
    "messi", "ronaldo", "maradona", "pelé", "neymar", "einstein", "newton", "tesla", "curie",
    "biden", "trump", "macron",
];

/// Goods commonly sold with a person's name on them.
const PRODUCT_HINTS: &[&str] = &[
    "camiseta", "camisetas", "shirt", "shirts", "jersey", "libro", "libros", "book", "books",
    "poster", "posters", "foto", "fotografía", "photo", "figura", "figure", "balón", "ball",
    "taza", "mug", "gorra", "cap",
];

#[derive(Debug, Clone)]
pub struct Screener {
    min_chars: usize,
    min_words: usize,
}

impl Screener {
    pub fn new(min_chars: usize, min_words: usize) -> Self {
        Self {
            min_chars,
            min_words,
        }
    }

    pub fn screen(&self, text: &str) -> Screen {
        let trimmed = text.trim();
        let words: Vec<&str> = trimmed.split_whitespace().collect();
        if trimmed.chars().count() < self.min_chars || words.len() < self.min_words {
            return Screen::TooShort;
        }
        let lower = trimmed.to_lowercase();
        if let Some(pattern) = OFF_TOPIC_PATTERNS.iter().find(|p| lower.contains(*p)) {
            return Screen::OutOfScope(pattern.to_string());
        }
        // A bare name is a person; "camiseta de Messi" is a product.
        if words.len() <= 3 {
            let tokens: Vec<&str> = lower
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();
            let names_product = tokens.iter().any(|w| PRODUCT_HINTS.contains(w));
            if let Some(name) = FAMOUS_NAMES.iter().find(|n| tokens.contains(n)) {
                if !names_product {
                    return Screen::OutOfScope(name.to_string());
                }
            }
        }
        Screen::Accept
    }
}

pub fn too_short_message(min_chars: usize, min_words: usize) -> String {
    format!(
        "A product description of at least {min_chars} characters and {min_words} words (what it is, material, use)"
    )
}

pub fn out_of_scope_message() -> String {
    "A description of a tangible physical product; questions about people, news or software cannot be classified".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screener() -> Screener {
        Screener::new(10, 2)
    }

    #[test]
    fn short_queries_are_rejected() {
        assert_eq!(screener().screen("tornillos"), Screen::TooShort);
        assert_eq!(screener().screen("   abc de   "), Screen::TooShort);
        assert_eq!(screener().screen("tornillosdeacero"), Screen::TooShort);
    }

    #[test]
    fn generic_product_passes_length_screen() {
        assert_eq!(screener().screen("producto genérico"), Screen::Accept);
    }

    #[test]
    fn off_topic_patterns_are_out_of_scope() {
        assert!(matches!(
            screener().screen("¿Quién es el presidente de Francia?"),
            Screen::OutOfScope(_)
        ));
        assert!(matches!(
            screener().screen("latest news about tariffs"),
            Screen::OutOfScope(_)
        ));
    }

    #[test]
    fn bare_names_are_out_of_scope_but_products_are_not() {
        assert!(matches!(screener().screen("Lionel Messi"), Screen::OutOfScope(_)));
        assert_eq!(
            screener().screen("camiseta de fútbol de Messi, poliéster"),
            Screen::Accept
        );
        assert_eq!(screener().screen("camiseta Messi"), Screen::Accept);
    }
}
