//! Persistent embedding cache.
//!
//! Entries are keyed by `(provider, model, provider_key, content hash)` and
//! stored as JSON arrays next to the index. Pruning keeps the most recently
//! written entries for one scope.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, types::Value, Connection, OptionalExtension};
use tracing::debug;

use super::embeddings::parse_embedding;
use super::error::MemoryResult;
use super::schema::EMBEDDING_CACHE_TABLE;

/// Identifies the provider configuration a cached vector was produced by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheScope {
    pub provider: String,
    pub model: String,
    pub provider_key: String,
}

pub struct EmbeddingCache<'c> {
    conn: &'c Connection,
}

impl<'c> EmbeddingCache<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Look up one vector. A payload that does not parse counts as a miss.
    pub fn get(&self, scope: &CacheScope, hash: &str) -> MemoryResult<Option<Vec<f32>>> {
        let raw: Option<Value> = self
            .conn
            .query_row(
                &format!(
                    "SELECT embedding FROM {EMBEDDING_CACHE_TABLE}
                     WHERE provider = ?1 AND model = ?2 AND provider_key = ?3 AND hash = ?4"
                ),
                params![scope.provider, scope.model, scope.provider_key, hash],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|value| decode(value, hash)))
    }

    /// Look up many hashes at once; only hits are returned.
    pub fn get_many(
        &self,
        scope: &CacheScope,
        hashes: &[String],
    ) -> MemoryResult<HashMap<String, Vec<f32>>> {
        let mut hits = HashMap::new();
        if hashes.is_empty() {
            return Ok(hits);
        }

        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT embedding FROM {EMBEDDING_CACHE_TABLE}
             WHERE provider = ?1 AND model = ?2 AND provider_key = ?3 AND hash = ?4"
        ))?;
        for hash in hashes {
            if hits.contains_key(hash) {
                continue;
            }
            let mut rows =
                stmt.query(params![scope.provider, scope.model, scope.provider_key, hash])?;
            if let Some(row) = rows.next()? {
                if let Some(vector) = decode(row.get(0)?, hash) {
                    hits.insert(hash.clone(), vector);
                }
            }
        }
        Ok(hits)
    }

    /// Insert or refresh a vector. Re-putting an existing key updates its
    /// payload and timestamp in place.
    pub fn put(&self, scope: &CacheScope, hash: &str, embedding: &[f32]) -> MemoryResult<()> {
        self.put_with_timestamp(scope, hash, embedding, Utc::now().timestamp_millis())
    }

    pub(crate) fn put_with_timestamp(
        &self,
        scope: &CacheScope,
        hash: &str,
        embedding: &[f32],
        updated_at: i64,
    ) -> MemoryResult<()> {
        let payload = serde_json::to_string(embedding)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {EMBEDDING_CACHE_TABLE}
                    (provider, model, provider_key, hash, embedding, dims, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(provider, model, provider_key, hash) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at"
            ),
            params![
                scope.provider,
                scope.model,
                scope.provider_key,
                hash,
                payload,
                embedding.len() as i64,
                updated_at
            ],
        )?;
        Ok(())
    }

    /// Number of entries stored for `scope`.
    pub fn count(&self, scope: &CacheScope) -> MemoryResult<usize> {
        let n: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {EMBEDDING_CACHE_TABLE}
                 WHERE provider = ?1 AND model = ?2 AND provider_key = ?3"
            ),
            params![scope.provider, scope.model, scope.provider_key],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Number of entries across every scope.
    pub fn total(&self) -> MemoryResult<usize> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {EMBEDDING_CACHE_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Drop the oldest entries of `scope` beyond `max_entries`.
    ///
    /// `None` (or a non-positive bound) leaves the cache untouched. Ties on
    /// the timestamp are broken by insertion order.
    pub fn prune(&self, scope: &CacheScope, max_entries: Option<usize>) -> MemoryResult<usize> {
        let Some(max) = max_entries.filter(|m| *m > 0) else {
            return Ok(0);
        };

        let count = self.count(scope)?;
        if count <= max {
            return Ok(0);
        }
        let excess = count - max;

        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {EMBEDDING_CACHE_TABLE} WHERE rowid IN (
                    SELECT rowid FROM {EMBEDDING_CACHE_TABLE}
                    WHERE provider = ?1 AND model = ?2 AND provider_key = ?3
                    ORDER BY updated_at ASC, rowid ASC
                    LIMIT ?4
                )"
            ),
            params![scope.provider, scope.model, scope.provider_key, excess as i64],
        )?;
        debug!(removed, max, "pruned embedding cache");
        Ok(removed)
    }
}

fn decode(value: Value, hash: &str) -> Option<Vec<f32>> {
    let vector = match value {
        Value::Text(text) => parse_embedding(&text),
        _ => None,
    };
    if vector.is_none() {
        debug!(hash, "ignoring unreadable cache entry");
    }
    vector
}
