//! Query feature extraction for adaptive fusion weighting.
//!
//! Pure function of the query string; no I/O, no external calls. The
//! resulting [`QueryFeatures`] value is passed through the pipeline instead
//! of hanging derived state off the query itself.

/// Token length above which a token counts toward semantic complexity.
const COMPLEXITY_LEN: usize = 6;

/// Features derived from a raw query string.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    /// Whitespace-delimited token count.
    pub token_count: usize,
    /// Query contains a quoted exact phrase (`"..."`).
    pub has_exact_phrase: bool,
    /// Query contains boolean operators (`AND`/`OR`/`NOT`/`+term`/`-term`).
    pub has_boolean_operators: bool,
    /// Mean token length in characters.
    pub avg_token_length: f32,
    /// Fraction of tokens longer than six characters, in [0, 1].
    pub complexity: f32,
}

impl QueryFeatures {
    /// Short query with exact-match intent: at most three tokens and at
    /// least one quoted phrase or boolean operator.
    pub fn is_short_exact(&self) -> bool {
        self.token_count <= 3 && (self.has_exact_phrase || self.has_boolean_operators)
    }
}

/// Derive [`QueryFeatures`] from a query string.
///
/// Deterministic: identical inputs always produce identical features.
pub fn analyze(query: &str) -> QueryFeatures {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let token_count = tokens.len();

    let has_exact_phrase = query.matches('"').count() >= 2;
    let has_boolean_operators = tokens.iter().any(|t| {
        matches!(*t, "AND" | "OR" | "NOT")
            || (t.len() > 1 && (t.starts_with('+') || t.starts_with('-')))
    });

    let (avg_token_length, complexity) = if token_count == 0 {
        (0.0, 0.0)
    } else {
        let total_len: usize = tokens.iter().map(|t| t.chars().count()).sum();
        let long = tokens
            .iter()
            .filter(|t| t.chars().count() > COMPLEXITY_LEN)
            .count();
        (
            total_len as f32 / token_count as f32,
            long as f32 / token_count as f32,
        )
    };

    QueryFeatures {
        token_count,
        has_exact_phrase,
        has_boolean_operators,
        avg_token_length,
        complexity,
    }
}
