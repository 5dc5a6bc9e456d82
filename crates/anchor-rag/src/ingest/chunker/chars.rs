//! Character-window chunker
//!
//! Splits text into fixed-size character windows with overlap, or packs
//! separator-delimited segments up to the window size.

/// Split `text` into character windows with `overlap` characters carried
/// forward. Enforces 0 <= overlap < size, trims each piece and drops
/// empties. Deterministic, no side effects.
pub fn chunk_chars(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if size == 0 || text.is_empty() {
        return Vec::new();
    }
    let overlap = overlap.min(size.saturating_sub(1));
    let step = (size - overlap).max(1);

    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < n {
        let end = (start + size).min(n);
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end >= n {
            break;
        }
        start += step;
    }
    chunks
}

/// Pack `separator`-delimited segments into chunks of at most `size`
/// characters, keeping the separator between segments of a chunk. A
/// single oversized segment becomes its own chunk.
pub fn chunk_chars_by_separator(text: &str, size: usize, separator: &str) -> Vec<String> {
    if size == 0 || text.is_empty() {
        return Vec::new();
    }
    if separator.is_empty() {
        return chunk_chars(text, size, 0);
    }

    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for segment in text.split(separator) {
        let addition = if buffer.is_empty() {
            segment.chars().count()
        } else {
            separator.chars().count() + segment.chars().count()
        };
        if !buffer.is_empty() && buffer.chars().count() + addition > size {
            let piece = buffer.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            buffer = segment.to_string();
        } else {
            if !buffer.is_empty() {
                buffer.push_str(separator);
            }
            buffer.push_str(segment);
        }
    }
    let piece = buffer.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
    chunks
}
