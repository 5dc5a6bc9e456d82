//! Token-window chunker (whitespace tokenizer)

/// Split `text` into windows of at most `max_tokens` whitespace tokens
/// with fractional `overlap` in [0.0, 0.5]. Trims each chunk and drops
/// empties. Deterministic, no side effects.
pub fn chunk_tokens(text: &str, max_tokens: usize, overlap: f64) -> Vec<String> {
    if max_tokens == 0 {
        return Vec::new();
    }
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }

    let overlap = overlap.clamp(0.0, 0.5);
    let step = ((max_tokens as f64) * (1.0 - overlap)).round() as usize;
    let step = step.max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let n = tokens.len();
    while start < n {
        let end = (start + max_tokens).min(n);
        let chunk = tokens[start..end].join(" ");
        if !chunk.trim().is_empty() {
            chunks.push(chunk.trim().to_string());
        }
        if end >= n {
            break;
        }
        start += step;
    }
    chunks
}

/// Whitespace token count used by the token-limit guards.
pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}
