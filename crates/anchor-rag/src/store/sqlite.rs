//! SQLite-backed vector store
//!
//! Embeddings are stored as JSON arrays and scored with a full scan; the
//! table sizes this system targets stay well inside what a scan handles.
//! Alias rotation recreates the view inside one transaction while holding
//! a process-level rotation mutex, so readers see exactly one target.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use super::{SearchRow, UpsertOutcome, VectorStore};
use crate::config::Distance;
use crate::error::{Error, Result};
use crate::types::ChunkRecord;

pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    /// At most one in-flight rotation per process
    rotation: Mutex<()>,
}

fn validate_identifier(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().unwrap_or('0').is_ascii_digit();
    if ok {
        Ok(())
    } else {
        Err(Error::store_failed(
            format!("invalid index identifier '{}'", name),
            false,
        ))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot_product = dot(a, b);
    let norm_a = dot(a, a).sqrt();
    let norm_b = dot(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot_product / (norm_a * norm_b)
}

impl SqliteVectorStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::store_failed(format!("cannot open database: {}", e), false))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            rotation: Mutex::new(()),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::store_failed(format!("cannot open database: {}", e), false))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            rotation: Mutex::new(()),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                table_name TEXT PRIMARY KEY,
                dim        INTEGER NOT NULL,
                distance   TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS alias_registry (
                alias      TEXT PRIMARY KEY,
                target     TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }

    fn table_meta(&self, conn: &Connection, table: &str) -> Result<Option<(usize, Distance)>> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT dim, distance FROM index_meta WHERE table_name = ?1",
                params![table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(dim, distance)| {
            let distance = match distance.as_str() {
                "cosine" => Distance::Cosine,
                _ => Distance::DotProduct,
            };
            (dim as usize, distance)
        }))
    }

    /// Resolve a view or physical table name to the physical table.
    fn resolve_target(&self, conn: &Connection, view: &str) -> Result<String> {
        let target: Option<String> = conn
            .query_row(
                "SELECT target FROM alias_registry WHERE alias = ?1",
                params![view],
                |row| row.get(0),
            )
            .optional()?;
        match target {
            Some(table) => Ok(table),
            None => {
                let exists: Option<String> = conn
                    .query_row(
                        "SELECT table_name FROM index_meta WHERE table_name = ?1",
                        params![view],
                        |row| row.get(0),
                    )
                    .optional()?;
                exists.ok_or_else(|| Error::not_found(format!("no index or alias '{}'", view)))
            }
        }
    }
}

impl VectorStore for SqliteVectorStore {
    fn ensure_index_table(&self, name: &str, dim: usize, distance: Distance) -> Result<()> {
        validate_identifier(name)?;
        let conn = self.conn.lock();
        if let Some((existing_dim, _)) = self.table_meta(&conn, name)? {
            if existing_dim != dim {
                return Err(Error::SchemaDrift {
                    table: name.to_string(),
                    expected: existing_dim,
                    actual: dim,
                });
            }
            return Ok(());
        }

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {name} (
                chunk_id  TEXT PRIMARY KEY,
                doc_id    TEXT NOT NULL,
                text      TEXT NOT NULL,
                metadata  TEXT NOT NULL,
                embedding TEXT NOT NULL,
                hash_norm TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_{name}_hash ON {name}(hash_norm);
            CREATE INDEX IF NOT EXISTS idx_{name}_doc ON {name}(doc_id);
            "#,
            name = name
        ))?;
        conn.execute(
            "INSERT OR REPLACE INTO index_meta (table_name, dim, distance) VALUES (?1, ?2, ?3)",
            params![name, dim as i64, distance.as_str()],
        )?;
        tracing::info!("ensured index table {} (dim={}, {})", name, dim, distance.as_str());
        Ok(())
    }

    fn upsert(
        &self,
        table: &str,
        rows: &[ChunkRecord],
        dedupe_by_hash: bool,
    ) -> Result<UpsertOutcome> {
        validate_identifier(table)?;
        let mut conn = self.conn.lock();
        let expected_dim = self
            .table_meta(&conn, table)?
            .map(|(dim, _)| dim)
            .ok_or_else(|| Error::not_found(format!("no index table '{}'", table)))?;

        let tx = conn.transaction()?;
        let mut outcome = UpsertOutcome::default();
        for row in rows {
            if row.embedding.len() != expected_dim {
                return Err(Error::SchemaDrift {
                    table: table.to_string(),
                    expected: expected_dim,
                    actual: row.embedding.len(),
                });
            }
            if dedupe_by_hash {
                if let Some(hash) = &row.hash_norm {
                    let exists: Option<i64> = tx
                        .query_row(
                            &format!(
                                "SELECT 1 FROM {} WHERE hash_norm = ?1 LIMIT 1",
                                table
                            ),
                            params![hash],
                            |r| r.get(0),
                        )
                        .optional()?;
                    if exists.is_some() {
                        outcome.skipped += 1;
                        continue;
                    }
                }
            }
            let metadata = serde_json::to_string(&row.metadata_json())
                .map_err(|e| Error::internal(format!("metadata serialization: {}", e)))?;
            let embedding = serde_json::to_string(&row.embedding)
                .map_err(|e| Error::internal(format!("embedding serialization: {}", e)))?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (chunk_id, doc_id, text, metadata, embedding, hash_norm) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    table
                ),
                params![
                    row.chunk_id,
                    row.doc_id,
                    row.text,
                    metadata,
                    embedding,
                    row.hash_norm
                ],
            )?;
            outcome.inserted += 1;
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn ensure_alias(&self, alias: &str, table: &str) -> Result<()> {
        validate_identifier(alias)?;
        validate_identifier(table)?;
        let _rotation = self.rotation.lock();
        let mut conn = self.conn.lock();

        if self.table_meta(&conn, table)?.is_none() {
            return Err(Error::not_found(format!(
                "cannot alias '{}' to missing table '{}'",
                alias, table
            )));
        }

        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP VIEW IF EXISTS {alias};\n\
             CREATE VIEW {alias} AS SELECT * FROM {table};",
            alias = alias,
            table = table
        ))?;
        tx.execute(
            "INSERT INTO alias_registry (alias, target, updated_at) VALUES (?1, ?2, datetime('now')) \
             ON CONFLICT(alias) DO UPDATE SET target = ?2, updated_at = datetime('now')",
            params![alias, table],
        )?;
        tx.commit()?;
        tracing::info!("alias {} -> {}", alias, table);
        Ok(())
    }

    fn similarity_search(&self, view: &str, query: &[f32], k: usize) -> Result<Vec<SearchRow>> {
        validate_identifier(view)?;
        let conn = self.conn.lock();
        let target = self.resolve_target(&conn, view)?;
        let (dim, distance) = self
            .table_meta(&conn, &target)?
            .ok_or_else(|| Error::not_found(format!("no index metadata for '{}'", target)))?;
        if query.len() != dim {
            return Err(Error::SchemaDrift {
                table: target,
                expected: dim,
                actual: query.len(),
            });
        }

        let mut statement = conn.prepare(&format!(
            "SELECT chunk_id, doc_id, text, metadata, embedding FROM {}",
            view
        ))?;
        let mut rows = statement.query([])?;
        let mut scored: Vec<SearchRow> = Vec::new();
        while let Some(row) = rows.next()? {
            let chunk_id: String = row.get(0)?;
            let doc_id: String = row.get(1)?;
            let text: String = row.get(2)?;
            let metadata_raw: String = row.get(3)?;
            let embedding_raw: String = row.get(4)?;

            let embedding: Vec<f32> = match serde_json::from_str(&embedding_raw) {
                Ok(vector) => vector,
                Err(e) => {
                    tracing::warn!("chunk {}: undecodable embedding: {}", chunk_id, e);
                    continue;
                }
            };
            if embedding.len() != dim {
                continue;
            }
            let metadata: serde_json::Value =
                serde_json::from_str(&metadata_raw).unwrap_or_else(|_| serde_json::json!({}));
            let raw_score = match distance {
                Distance::DotProduct => dot(query, &embedding),
                Distance::Cosine => cosine_distance(query, &embedding),
            };
            let source = metadata
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            scored.push(SearchRow {
                chunk_id,
                doc_id,
                text,
                source,
                metadata,
                raw_score,
            });
        }

        if distance.higher_is_better() {
            scored.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));
        } else {
            scored.sort_by(|a, b| a.raw_score.total_cmp(&b.raw_score));
        }
        scored.truncate(k);
        Ok(scored)
    }

    fn count(&self, table: &str) -> Result<usize> {
        validate_identifier(table)?;
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        validate_identifier(table)?;
        let conn = self.conn.lock();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))?;
        conn.execute(
            "DELETE FROM index_meta WHERE table_name = ?1",
            params![table],
        )?;
        Ok(())
    }

    fn alias_target(&self, alias: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let target: Option<String> = conn
            .query_row(
                "SELECT target FROM alias_registry WHERE alias = ?1",
                params![alias],
                |row| row.get(0),
            )
            .optional()?;
        Ok(target)
    }

    fn next_version(&self, alias: &str) -> Result<u32> {
        validate_identifier(alias)?;
        let conn = self.conn.lock();
        let prefix = format!("{}_v", alias);
        let mut statement =
            conn.prepare("SELECT table_name FROM index_meta WHERE table_name LIKE ?1")?;
        let names = statement
            .query_map(params![format!("{}%", prefix)], |row| {
                row.get::<_, String>(0)
            })?
            .filter_map(|name| name.ok());

        let mut max_version = 0u32;
        for name in names {
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Ok(version) = rest.parse::<u32>() {
                    max_version = max_version.max(version);
                }
            }
        }
        Ok(max_version + 1)
    }
}
