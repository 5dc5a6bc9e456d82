//! Vector store seam
//!
//! Physical indexes are versioned tables (`<alias>_vN`); an alias view is
//! the only name readers ever query. Rotating the alias is the only way
//! to make new data live.

pub mod sqlite;

use crate::config::Distance;
use crate::error::Result;
use crate::types::ChunkRecord;

pub use sqlite::SqliteVectorStore;

/// Result counters of an upsert batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// One row returned by similarity search
#[derive(Debug, Clone)]
pub struct SearchRow {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub source: String,
    pub metadata: serde_json::Value,
    /// Raw score in the distance's native convention
    pub raw_score: f32,
}

impl SearchRow {
    pub fn chunk_type(&self) -> &str {
        self.metadata
            .get("chunk_type")
            .and_then(|v| v.as_str())
            .unwrap_or("text")
    }
}

/// Persistent store behind retrieval and ingestion.
pub trait VectorStore: Send + Sync {
    /// Idempotent create; fails with `schema_drift` when the existing
    /// table declares a different dimension.
    fn ensure_index_table(&self, name: &str, dim: usize, distance: Distance) -> Result<()>;

    /// Insert rows; with `dedupe_by_hash` rows whose `hash_norm` already
    /// exists in the table are silently skipped.
    fn upsert(&self, table: &str, rows: &[ChunkRecord], dedupe_by_hash: bool)
        -> Result<UpsertOutcome>;

    /// Atomically repoint the alias view. Either succeeds completely or
    /// leaves the alias pointing at its previous target.
    fn ensure_alias(&self, alias: &str, table: &str) -> Result<()>;

    /// Top-k rows of `view` ordered by the index's native score order.
    fn similarity_search(&self, view: &str, query: &[f32], k: usize) -> Result<Vec<SearchRow>>;

    fn count(&self, table: &str) -> Result<usize>;

    fn drop_table(&self, table: &str) -> Result<()>;

    /// Current target of an alias, if the alias exists.
    fn alias_target(&self, alias: &str) -> Result<Option<String>>;

    /// Next free version number for `<alias>_vN`, monotonic per alias.
    fn next_version(&self, alias: &str) -> Result<u32>;
}
