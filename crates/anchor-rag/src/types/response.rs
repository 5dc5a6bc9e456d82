//! Chat response envelope and decision diagnostics

use serde::{Deserialize, Serialize};

/// Answer mode chosen by the decision engine. Fallback is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Rag,
    Hybrid,
    Fallback,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rag => "rag",
            Self::Hybrid => "hybrid",
            Self::Fallback => "fallback",
        }
    }
}

/// Whether the retrieved rows all made it into the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcesUsed {
    All,
    Partial,
    None,
}

/// A chunk that actually entered the prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsedChunk {
    pub chunk_id: String,
    pub source: String,
    pub score: f32,
    /// At most 300 characters of the chunk text
    pub snippet: String,
}

/// One retrieved row, enriched with scores and a preview. Figure rows stay
/// in this list even though they never enter the prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub source: String,
    pub chunk_type: String,
    pub raw_score: f32,
    pub similarity: f32,
    pub rank: usize,
    pub text_preview: String,
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

/// Diagnostic record attached to every answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionExplain {
    pub score_mode: String,
    pub distance: String,
    pub max_similarity: f32,
    pub threshold_low: f32,
    pub threshold_high: f32,
    pub top_k: usize,
    pub short_query_active: bool,
    pub mode: AnswerMode,
    pub effective_query: String,
    pub used_llm: String,
    /// Alias view the search ran against
    pub retrieval_target: String,
    pub hybrid_candidates: usize,
    pub hybrid_sent: usize,
    pub gate_failed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Wire envelope for POST /chat. `answer2`/`answer3` are reserved and
/// always null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub question: String,
    pub answer: String,
    pub answer2: Option<String>,
    pub answer3: Option<String>,
    pub retrieved_chunks_metadata: Vec<RetrievedChunk>,
    pub used_chunks: Vec<UsedChunk>,
    pub mode: AnswerMode,
    pub sources_used: SourcesUsed,
    pub decision_explain: DecisionExplain,
}

/// Truncate a snippet on a char boundary.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AnswerMode::Fallback).unwrap(),
            "\"fallback\""
        );
        assert_eq!(AnswerMode::Hybrid.as_str(), "hybrid");
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let text = "día y noche, día y noche";
        let cut = snippet(text, 5);
        assert_eq!(cut, "día y");
    }
}
