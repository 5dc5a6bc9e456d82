//! Golden-query evaluation
//!
//! Runs a fixed query set against the freshly written physical table
//! (never the alias) and aggregates hit@k, MRR and phrase-hit rate. The
//! promotion gates compare against these aggregates.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::EvalGates;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::store::VectorStore;

/// One golden query as written on disk
#[derive(Debug, Clone, Deserialize)]
pub struct GoldenQuery {
    pub query: String,
    #[serde(default, alias = "doc_ids")]
    pub expect_doc_ids: Vec<String>,
    #[serde(default, alias = "phrases")]
    pub expect_phrases: Vec<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct GoldenFile {
    #[serde(default)]
    queries: Vec<GoldenQuery>,
}

/// Per-query outcome kept for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct QueryDetail {
    pub query: String,
    pub top_k: usize,
    pub expected_ids: Vec<String>,
    pub matched_rank: Option<usize>,
    pub matched_doc_id: Option<String>,
    pub phrase_hit: bool,
}

/// Aggregated evaluation report
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub table: String,
    pub queries_total: usize,
    pub eligible_for_doc_metrics: usize,
    pub doc_hits: usize,
    pub hit_rate: f64,
    pub mrr: f64,
    pub phrase_hit_rate: f64,
    pub details: Vec<QueryDetail>,
}

impl EvalReport {
    /// Returns the name of the first gate the report fails, if any.
    pub fn failed_gate(&self, gates: &EvalGates) -> Option<&'static str> {
        if let Some(min) = gates.min_hit_rate {
            if self.hit_rate < min {
                return Some("min_hit_rate");
            }
        }
        if let Some(min) = gates.min_mrr {
            if self.mrr < min {
                return Some("min_mrr");
            }
        }
        if let Some(min) = gates.min_phrase_hit_rate {
            if self.phrase_hit_rate < min {
                return Some("min_phrase_hit_rate");
            }
        }
        None
    }
}

/// Load and validate a golden-query file.
pub fn load_golden_queries(path: &Path) -> Result<Vec<GoldenQuery>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::internal(format!("golden queries not readable {}: {}", path.display(), e))
    })?;
    let parsed: GoldenFile = match serde_json::from_str::<GoldenFile>(&raw) {
        Ok(file) => file,
        Err(_) => GoldenFile {
            queries: serde_json::from_str::<Vec<GoldenQuery>>(&raw).map_err(|e| {
                Error::internal(format!("invalid golden queries {}: {}", path.display(), e))
            })?,
        },
    };
    if parsed.queries.is_empty() {
        return Err(Error::internal("golden queries file is empty"));
    }
    for (index, query) in parsed.queries.iter().enumerate() {
        if query.query.trim().is_empty() {
            return Err(Error::internal(format!(
                "golden query #{} missing 'query'",
                index + 1
            )));
        }
        if let Some(top_k) = query.top_k {
            if top_k == 0 {
                return Err(Error::internal(format!(
                    "golden query #{} top_k must be positive",
                    index + 1
                )));
            }
        }
    }
    Ok(parsed.queries)
}

/// Evaluate the golden set against a physical table.
pub async fn evaluate_golden(
    store: &Arc<dyn VectorStore>,
    embedder: &Arc<dyn Embedder>,
    table: &str,
    golden_path: &Path,
    default_top_k: usize,
) -> Result<EvalReport> {
    let queries = load_golden_queries(golden_path)?;
    let default_top_k = default_top_k.max(1);

    let mut eligible = 0usize;
    let mut hits = 0usize;
    let mut mrr_sum = 0.0f64;
    let mut phrase_eligible = 0usize;
    let mut phrase_hits = 0usize;
    let mut details = Vec::with_capacity(queries.len());

    for item in &queries {
        let top_k = item.top_k.unwrap_or(default_top_k);
        let query_vector = embedder.embed_query(&item.query).await?;
        let rows = store.similarity_search(table, &query_vector, top_k)?;

        let mut matched_rank = None;
        let mut matched_doc_id = None;
        if !item.expect_doc_ids.is_empty() {
            eligible += 1;
            for (rank, row) in rows.iter().enumerate() {
                if item.expect_doc_ids.iter().any(|id| *id == row.doc_id) {
                    matched_rank = Some(rank + 1);
                    matched_doc_id = Some(row.doc_id.clone());
                    break;
                }
            }
            if let Some(rank) = matched_rank {
                hits += 1;
                mrr_sum += 1.0 / rank as f64;
            }
        }

        let mut phrase_hit = false;
        if !item.expect_phrases.is_empty() {
            phrase_eligible += 1;
            'rows: for row in &rows {
                let text = row.text.to_lowercase();
                for phrase in &item.expect_phrases {
                    if text.contains(&phrase.to_lowercase()) {
                        phrase_hit = true;
                        break 'rows;
                    }
                }
            }
            if phrase_hit {
                phrase_hits += 1;
            }
        }

        details.push(QueryDetail {
            query: item.query.clone(),
            top_k,
            expected_ids: item.expect_doc_ids.clone(),
            matched_rank,
            matched_doc_id,
            phrase_hit,
        });
    }

    let hit_rate = if eligible > 0 {
        hits as f64 / eligible as f64
    } else {
        0.0
    };
    let mrr = if eligible > 0 {
        mrr_sum / eligible as f64
    } else {
        0.0
    };
    let phrase_hit_rate = if phrase_eligible > 0 {
        phrase_hits as f64 / phrase_eligible as f64
    } else {
        0.0
    };

    tracing::info!(
        "eval table={} queries={} doc_hit={}/{} mrr={:.3} phrase_hit_rate={:.3}",
        table,
        queries.len(),
        hits,
        eligible,
        mrr,
        phrase_hit_rate
    );

    Ok(EvalReport {
        table: table.to_string(),
        queries_total: queries.len(),
        eligible_for_doc_metrics: eligible,
        doc_hits: hits,
        hit_rate,
        mrr,
        phrase_hit_rate,
        details,
    })
}
