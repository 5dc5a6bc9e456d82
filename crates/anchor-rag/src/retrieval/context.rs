//! Context assembly: dedupe, per-doc cap, MMR diversification and the
//! greedy budget packer.

use std::collections::{HashMap, HashSet};

use crate::config::RetrievalConfig;

/// A text-only candidate for the prompt context
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Index into the retrieved rows
    pub row_index: usize,
    pub chunk_id: String,
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub similarity: f32,
    pub dedupe_key: String,
}

/// Selection result plus whether anything was dropped on the way
#[derive(Debug, Default)]
pub struct Selection {
    pub selected: Vec<Candidate>,
    pub dropped_any: bool,
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_alphabetic()))
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

/// Reorder candidates by maximal marginal relevance: trade off relevance
/// against token overlap with already-picked chunks.
fn mmr_order(candidates: Vec<Candidate>, lambda: f32) -> Vec<Candidate> {
    let token_sets: Vec<HashSet<String>> =
        candidates.iter().map(|c| tokens(&c.text)).collect();
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut picked_order: Vec<usize> = Vec::new();

    while !remaining.is_empty() {
        let mut best_position = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (position, &index) in remaining.iter().enumerate() {
            let score = if picked_order.is_empty() {
                candidates[index].similarity
            } else {
                let max_overlap = picked_order
                    .iter()
                    .map(|&picked| jaccard(&token_sets[index], &token_sets[picked]))
                    .fold(0.0f32, f32::max);
                lambda * candidates[index].similarity - (1.0 - lambda) * max_overlap
            };
            if score > best_score {
                best_score = score;
                best_position = position;
            }
        }
        picked_order.push(remaining.remove(best_position));
    }

    let mut by_index: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    picked_order
        .into_iter()
        .filter_map(|index| by_index[index].take())
        .collect()
}

/// Select the chunks that may enter the prompt. Order of operations:
/// sort by similarity, dedupe, per-doc cap, MMR, length floor, greedy
/// budget.
pub fn select_context(mut candidates: Vec<Candidate>, config: &RetrievalConfig) -> Selection {
    let initial = candidates.len();
    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    // Dedupe by key, first (highest-similarity) occurrence wins
    let mut seen_keys: HashSet<String> = HashSet::new();
    candidates.retain(|candidate| seen_keys.insert(candidate.dedupe_key.clone()));

    // Per-doc cap
    if config.cap_per_doc > 0 {
        let mut per_doc: HashMap<String, usize> = HashMap::new();
        candidates.retain(|candidate| {
            let count = per_doc.entry(candidate.doc_id.clone()).or_insert(0);
            *count += 1;
            *count <= config.cap_per_doc
        });
    }

    // Diversify over the full candidate set, then apply the length floor
    if let Some(lambda) = config.mmr_lambda {
        candidates = mmr_order(candidates, lambda.clamp(0.0, 1.0));
    }

    // Length floor
    candidates.retain(|candidate| {
        candidate.text.trim().chars().count() >= config.hybrid.min_tokens_per_chunk
    });

    // Greedy pack: first chunk always fits, later ones respect budgets
    let mut selected: Vec<Candidate> = Vec::new();
    let mut total_chars = 0usize;
    for candidate in candidates {
        if selected.len() >= config.hybrid.max_chunks {
            break;
        }
        let length = candidate.text.chars().count();
        let joiner = if selected.is_empty() { 0 } else { 2 };
        if !selected.is_empty() && total_chars + joiner + length > config.hybrid.max_context_chars {
            break;
        }
        total_chars += joiner + length;
        selected.push(candidate);
    }

    Selection {
        dropped_any: selected.len() < initial,
        selected,
    }
}

/// Join selected chunk texts into the prompt context.
pub fn join_context(selection: &Selection) -> String {
    selection
        .selected
        .iter()
        .map(|candidate| candidate.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n")
}
