//! Score interpretation
//!
//! All distance-specific math lives here; the decision logic only ever
//! sees a similarity in [0, 1] (or the raw score in raw mode).

use crate::config::Distance;

/// Map a raw store score to a similarity in [0, 1].
///
/// - dot product over unit vectors: raw in [-1, 1] -> (raw + 1) / 2
/// - cosine distance: raw in [0, 2] -> 1 - raw, clamped
pub fn to_similarity(raw: f32, distance: Distance) -> f32 {
    let value = match distance {
        Distance::DotProduct => (raw + 1.0) / 2.0,
        Distance::Cosine => 1.0 - raw,
    };
    value.clamp(0.0, 1.0)
}

/// A short query has at most `max_tokens` alphabetic tokens after
/// lowercasing and stripping punctuation.
pub fn is_short_query(question: &str, max_tokens: usize) -> bool {
    let cleaned: String = question
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let count = cleaned
        .split_whitespace()
        .filter(|token| token.chars().all(|c| c.is_alphabetic()))
        .count();
    count <= max_tokens
}
