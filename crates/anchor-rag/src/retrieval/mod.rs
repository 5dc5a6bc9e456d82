//! Retrieval service: similarity search, mode decision, context
//! assembly, prompt dispatch and fallback.

pub mod context;
pub mod scoring;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{AppConfig, DomainConfig, PromptsConfig, RetrievalConfig, ScoreMode};
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::llm::ChatModel;
use crate::store::{SearchRow, VectorStore};
use crate::types::response::{snippet, RetrievedChunk};
use crate::types::{AnswerMode, ChatResponse, DecisionExplain, SourcesUsed, UsedChunk};
use context::{join_context, select_context, Candidate, Selection};

const SNIPPET_CHARS: usize = 300;

/// Per-request answer engine. Holds its collaborators by reference
/// counted handles; construct once at startup and share.
pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    primary: Arc<dyn ChatModel>,
    fallback: Arc<dyn ChatModel>,
    retrieval: RetrievalConfig,
    prompts: PromptsConfig,
    default_alias: String,
    domains: BTreeMap<String, DomainConfig>,
}

/// Effective thresholds for one request
struct Thresholds {
    low: f32,
    high: f32,
}

impl RetrievalService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        primary: Arc<dyn ChatModel>,
        fallback: Arc<dyn ChatModel>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            primary,
            fallback,
            retrieval: config.retrieval.clone(),
            prompts: config.prompts.clone(),
            default_alias: config.embeddings.alias.name.clone(),
            domains: config.embeddings.domains.clone(),
        }
    }

    /// Answer a question, optionally routed to a domain alias.
    pub async fn answer(&self, question: &str, domain_key: Option<&str>) -> Result<ChatResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::bad_request("question must not be empty"));
        }

        let view = match domain_key {
            None => self.default_alias.clone(),
            Some(key) => self
                .domains
                .get(key)
                .map(|domain| domain.alias_name.clone())
                .ok_or_else(|| Error::UnknownDomain(key.to_string()))?,
        };

        let query_vector = self.embedder.embed_query(question).await?;
        let rows = self
            .store
            .similarity_search(&view, &query_vector, self.retrieval.top_k)?;

        let short_query = scoring::is_short_query(question, self.retrieval.short_query.max_tokens);
        let retrieved = self.enrich_rows(&rows);

        let max_similarity = retrieved
            .iter()
            .map(|row| row.similarity)
            .fold(0.0f32, f32::max);
        let max_raw = rows
            .iter()
            .map(|row| row.raw_score)
            .fold(f32::NEG_INFINITY, f32::max);
        let decision_score = match self.retrieval.score_mode {
            ScoreMode::Normalized => max_similarity,
            ScoreMode::Raw => {
                if rows.is_empty() {
                    0.0
                } else {
                    max_raw
                }
            }
        };
        let thresholds = self.thresholds(short_query);

        let request = RequestContext {
            question,
            view: &view,
            short_query,
            decision_score,
            thresholds: &thresholds,
            retrieved,
        };

        if rows.is_empty() {
            return self
                .fallback_response(request, 0, Some("below_threshold_low"), None)
                .await;
        }

        // Mode decision on the max score
        if request.decision_score < thresholds.high && short_query {
            // Short queries never get the hybrid band: tighter evidence or bust.
            let reason = if request.decision_score < thresholds.low {
                "below_threshold_low"
            } else {
                "below_threshold_high"
            };
            return self.fallback_response(request, 0, Some(reason), None).await;
        }
        let mode = if request.decision_score >= thresholds.high {
            AnswerMode::Rag
        } else if request.decision_score >= thresholds.low {
            AnswerMode::Hybrid
        } else {
            return self
                .fallback_response(request, 0, Some("below_threshold_low"), None)
                .await;
        };

        // Context assembly over text-only rows
        let candidates = self.candidates(&rows);
        let candidate_count = candidates.len();
        let selection = select_context(candidates, &self.retrieval);

        if let Some(gate) = self.failed_gate(mode, max_similarity, &selection) {
            let reason = format!("gate_failed_{}", gate);
            return self
                .fallback_response(request, candidate_count, Some(&reason), Some(gate))
                .await;
        }

        let context_text = join_context(&selection);
        if context_text.is_empty() {
            return self
                .fallback_response(
                    request,
                    candidate_count,
                    Some("gate_failed_min_context"),
                    Some("min_context"),
                )
                .await;
        }

        let system_prompt = match mode {
            AnswerMode::Rag => &self.prompts.rag,
            AnswerMode::Hybrid => &self.prompts.hybrid,
            AnswerMode::Fallback => unreachable!("fallback handled above"),
        };
        let prompt = compose_prompt(system_prompt, &context_text, question);
        let answer = self
            .primary
            .generate(&prompt, self.prompts.max_output_tokens)
            .await?;
        let answer = answer.trim().to_string();

        if answer.is_empty() || answer == self.prompts.no_context_token {
            let reason = if answer.is_empty() {
                "llm_empty"
            } else {
                "llm_no_context_token"
            };
            return self
                .fallback_response(request, candidate_count, Some(reason), None)
                .await;
        }

        let used_chunks: Vec<UsedChunk> = selection
            .selected
            .iter()
            .map(|candidate| UsedChunk {
                chunk_id: candidate.chunk_id.clone(),
                source: candidate.source.clone(),
                score: candidate.similarity,
                snippet: snippet(&candidate.text, SNIPPET_CHARS),
            })
            .collect();

        let sources_used = if used_chunks.is_empty() {
            SourcesUsed::None
        } else if selection.selected.len() == rows.len() {
            SourcesUsed::All
        } else {
            SourcesUsed::Partial
        };

        let explain = self.explain(
            &request,
            mode,
            "primary",
            candidate_count,
            used_chunks.len(),
            None,
            None,
        );

        Ok(ChatResponse {
            question: question.to_string(),
            answer,
            answer2: None,
            answer3: None,
            retrieved_chunks_metadata: request.retrieved,
            used_chunks,
            mode,
            sources_used,
            decision_explain: explain,
        })
    }

    /// Invoke the fallback model with the bare question.
    async fn fallback_response(
        &self,
        request: RequestContext<'_>,
        hybrid_candidates: usize,
        reason: Option<&str>,
        gate_failed: Option<&str>,
    ) -> Result<ChatResponse> {
        let prompt = if self.prompts.fallback.is_empty() {
            request.question.to_string()
        } else {
            format!("{}\n\n{}", self.prompts.fallback, request.question)
        };
        let answer = self
            .fallback
            .generate(&prompt, self.prompts.max_output_tokens)
            .await?;

        let explain = self.explain(
            &request,
            AnswerMode::Fallback,
            "fallback",
            hybrid_candidates,
            0,
            reason,
            gate_failed,
        );

        Ok(ChatResponse {
            question: request.question.to_string(),
            answer: answer.trim().to_string(),
            answer2: None,
            answer3: None,
            retrieved_chunks_metadata: request.retrieved,
            used_chunks: Vec::new(),
            mode: AnswerMode::Fallback,
            sources_used: SourcesUsed::None,
            decision_explain: explain,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn explain(
        &self,
        request: &RequestContext<'_>,
        mode: AnswerMode,
        used_llm: &str,
        hybrid_candidates: usize,
        hybrid_sent: usize,
        reason: Option<&str>,
        gate_failed: Option<&str>,
    ) -> DecisionExplain {
        DecisionExplain {
            score_mode: match self.retrieval.score_mode {
                ScoreMode::Normalized => "normalized".to_string(),
                ScoreMode::Raw => "raw".to_string(),
            },
            distance: self.retrieval.distance.as_str().to_string(),
            max_similarity: request.decision_score,
            threshold_low: request.thresholds.low,
            threshold_high: request.thresholds.high,
            top_k: self.retrieval.top_k,
            short_query_active: request.short_query,
            mode,
            effective_query: request.question.to_string(),
            used_llm: used_llm.to_string(),
            retrieval_target: request.view.to_string(),
            hybrid_candidates,
            hybrid_sent,
            gate_failed: gate_failed.map(str::to_string),
            reason: reason.map(str::to_string),
        }
    }

    /// Thresholds for the request: raw-metric ones in raw mode,
    /// short-query overrides when few alphabetic tokens.
    fn thresholds(&self, short_query: bool) -> Thresholds {
        let retrieval = &self.retrieval;
        let (base_low, base_high) = match retrieval.score_mode {
            ScoreMode::Normalized => (retrieval.threshold_low, retrieval.threshold_high),
            ScoreMode::Raw => match retrieval.distance {
                crate::config::Distance::DotProduct => (
                    retrieval.raw_dot_low.unwrap_or(retrieval.threshold_low),
                    retrieval.raw_dot_high.unwrap_or(retrieval.threshold_high),
                ),
                crate::config::Distance::Cosine => (
                    retrieval.raw_cosine_low.unwrap_or(retrieval.threshold_low),
                    retrieval.raw_cosine_high.unwrap_or(retrieval.threshold_high),
                ),
            },
        };
        if short_query {
            Thresholds {
                low: retrieval.short_query.threshold_low.unwrap_or(base_low),
                high: retrieval.short_query.threshold_high.unwrap_or(base_high),
            }
        } else {
            Thresholds {
                low: base_low,
                high: base_high,
            }
        }
    }

    fn enrich_rows(&self, rows: &[SearchRow]) -> Vec<RetrievedChunk> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| RetrievedChunk {
                chunk_id: row.chunk_id.clone(),
                doc_id: row.doc_id.clone(),
                source: row.source.clone(),
                chunk_type: row.chunk_type().to_string(),
                raw_score: row.raw_score,
                similarity: scoring::to_similarity(row.raw_score, self.retrieval.distance),
                rank: index + 1,
                text_preview: snippet(&row.text, SNIPPET_CHARS),
                metadata: row.metadata.clone(),
            })
            .collect()
    }

    /// Text-only candidates: rows whose chunk type is excluded stay in
    /// the metadata but never reach the prompt.
    fn candidates(&self, rows: &[SearchRow]) -> Vec<Candidate> {
        let excluded = &self.retrieval.hybrid.exclude_chunk_types_from_llm;
        rows.iter()
            .enumerate()
            .filter(|(_, row)| !excluded.iter().any(|kind| kind == row.chunk_type()))
            .map(|(index, row)| {
                let dedupe_key = row
                    .metadata
                    .get(&self.retrieval.dedupe_by)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| {
                        if row.source.is_empty() {
                            None
                        } else {
                            Some(row.source.clone())
                        }
                    })
                    .unwrap_or_else(|| row.chunk_id.clone());
                Candidate {
                    row_index: index,
                    chunk_id: row.chunk_id.clone(),
                    doc_id: row.doc_id.clone(),
                    source: row.source.clone(),
                    text: row.text.clone(),
                    similarity: scoring::to_similarity(row.raw_score, self.retrieval.distance),
                    dedupe_key,
                }
            })
            .collect()
    }

    /// First hybrid gate that fails, if any. Gates only guard hybrid.
    fn failed_gate(
        &self,
        mode: AnswerMode,
        max_similarity: f32,
        selection: &Selection,
    ) -> Option<&'static str> {
        if mode != AnswerMode::Hybrid {
            return None;
        }
        let hybrid = &self.retrieval.hybrid;
        if max_similarity < hybrid.min_similarity_for_hybrid {
            return Some("min_similarity");
        }
        if selection.selected.len() < hybrid.min_chunks_for_hybrid {
            return Some("min_chunks");
        }
        let total_chars: usize = selection
            .selected
            .iter()
            .map(|candidate| candidate.text.chars().count())
            .sum();
        if total_chars < hybrid.min_total_context_chars {
            return Some("min_context");
        }
        None
    }
}

struct RequestContext<'a> {
    question: &'a str,
    view: &'a str,
    short_query: bool,
    decision_score: f32,
    thresholds: &'a Thresholds,
    retrieved: Vec<RetrievedChunk>,
}

fn compose_prompt(system_prompt: &str, context: &str, question: &str) -> String {
    let body = format!("[Context]\n{}\n\n[Question]\n{}", context, question);
    if system_prompt.is_empty() {
        body
    } else {
        format!("{}\n\n{}", system_prompt, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_has_context_and_question_markers() {
        let prompt = compose_prompt("SYSTEM", "some context", "why?");
        assert!(prompt.starts_with("SYSTEM\n\n"));
        assert!(prompt.contains("[Context]\nsome context"));
        assert!(prompt.ends_with("[Question]\nwhy?"));
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let prompt = compose_prompt("", "ctx", "q");
        assert!(prompt.starts_with("[Context]"));
    }
}
