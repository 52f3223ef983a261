use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MemorySource;

use super::embeddings::{cosine_similarity, parse_embedding, vec_to_blob};
use super::error::MemoryResult;
use super::schema::{self, SchemaStatus, FTS_TABLE, VECTOR_TABLE};
use super::sessions::WatermarkStore;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub agent_id: String,
    pub source: MemorySource,
    pub hash: String,
    pub mtime_ms: i64,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub path: String,
    pub agent_id: String,
    pub source: MemorySource,
    pub start_line: u32,
    pub end_line: u32,
    pub hash: String,
    pub model: String,
    pub text: String,
    /// Empty when the chunk was indexed without an embedding provider.
    pub embedding: Vec<f32>,
}

/// A chunk matched by one of the query channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHit {
    pub id: String,
    pub path: String,
    pub agent_id: String,
    pub source: MemorySource,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed index store. Owned by exactly one manager.
pub struct MemoryStore {
    conn: Connection,
    status: SchemaStatus,
    snippet_max_chars: usize,
}

impl MemoryStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path, vector_enabled: bool, snippet_max_chars: usize) -> MemoryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        schema::register_vector_extension();
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn, vector_enabled, snippet_max_chars)?;
        info!(path = %path.display(), "memory store opened");
        Ok(store)
    }

    pub fn open_in_memory(vector_enabled: bool, snippet_max_chars: usize) -> MemoryResult<Self> {
        schema::register_vector_extension();
        Self::from_connection(Connection::open_in_memory()?, vector_enabled, snippet_max_chars)
    }

    fn from_connection(
        conn: Connection,
        vector_enabled: bool,
        snippet_max_chars: usize,
    ) -> MemoryResult<Self> {
        let status = schema::ensure_schema(&conn, vector_enabled)?;
        Ok(Self {
            conn,
            status,
            snippet_max_chars: snippet_max_chars.max(1),
        })
    }

    pub fn status(&self) -> &SchemaStatus {
        &self.status
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn read_meta(&self, key: &str) -> MemoryResult<Option<String>> {
        schema::read_meta(&self.conn, key)
    }

    pub fn write_meta(&self, key: &str, value: &str) -> MemoryResult<()> {
        schema::write_meta(&self.conn, key, value)
    }

    // -- files -------------------------------------------------------------

    pub fn get_file(&self, path: &str, agent_id: &str) -> MemoryResult<Option<FileRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT path, agent_id, source, hash, mtime, size FROM files
                 WHERE path = ?1 AND agent_id = ?2",
                params![path, agent_id],
                file_from_row,
            )
            .optional()?)
    }

    pub fn list_files(&self, agent_id: &str, source: MemorySource) -> MemoryResult<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, agent_id, source, hash, mtime, size FROM files
             WHERE agent_id = ?1 AND source = ?2 ORDER BY path",
        )?;
        let rows = stmt
            .query_map(params![agent_id, source.as_str()], file_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace every chunk of `file` and record the file, atomically.
    ///
    /// Readers never observe a partially replaced file: on error the
    /// previous chunks and file record remain.
    pub fn replace_file(&mut self, file: &FileRecord, chunks: &[ChunkRecord]) -> MemoryResult<()> {
        let fts = self.status.fts.available;
        let vector_dims = chunks
            .iter()
            .find(|c| !c.embedding.is_empty())
            .map(|c| c.embedding.len());
        let vector = self.status.vector.available && vector_dims.is_some();
        if let (true, Some(dims)) = (vector, vector_dims) {
            schema::ensure_vector_table(&self.conn, dims)?;
        }
        let has_vector_table = self.status.vector.available && self.vector_dims()?.is_some();
        let now = Utc::now().timestamp_millis();

        let tx = self.conn.transaction()?;
        delete_file_chunks(&tx, &file.path, &file.agent_id, fts, has_vector_table)?;

        {
            let mut insert_chunk = tx.prepare_cached(
                "INSERT INTO chunks
                    (id, path, agent_id, source, start_line, end_line, hash, model, text, embedding, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            let mut insert_fts = if fts {
                Some(tx.prepare_cached(&format!(
                    "INSERT INTO {FTS_TABLE}
                        (text, id, path, agent_id, source, model, start_line, end_line)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ))?)
            } else {
                None
            };
            let mut insert_vec = if vector {
                Some(tx.prepare_cached(&format!(
                    "INSERT INTO {VECTOR_TABLE} (id, embedding) VALUES (?1, ?2)"
                ))?)
            } else {
                None
            };

            for chunk in chunks {
                insert_chunk.execute(params![
                    chunk.id,
                    chunk.path,
                    chunk.agent_id,
                    chunk.source.as_str(),
                    chunk.start_line,
                    chunk.end_line,
                    chunk.hash,
                    chunk.model,
                    chunk.text,
                    serde_json::to_string(&chunk.embedding)?,
                    now,
                ])?;
                if let Some(stmt) = insert_fts.as_mut() {
                    stmt.execute(params![
                        chunk.text,
                        chunk.id,
                        chunk.path,
                        chunk.agent_id,
                        chunk.source.as_str(),
                        chunk.model,
                        chunk.start_line,
                        chunk.end_line,
                    ])?;
                }
                if let Some(stmt) = insert_vec.as_mut() {
                    if Some(chunk.embedding.len()) == vector_dims {
                        stmt.execute(params![chunk.id, vec_to_blob(&chunk.embedding)])?;
                    }
                }
            }
        }

        tx.execute(
            "INSERT INTO files (path, agent_id, source, hash, mtime, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(path, agent_id) DO UPDATE SET
                source = excluded.source,
                hash = excluded.hash,
                mtime = excluded.mtime,
                size = excluded.size",
            params![
                file.path,
                file.agent_id,
                file.source.as_str(),
                file.hash,
                file.mtime_ms,
                file.size
            ],
        )?;
        tx.commit()?;

        debug!(path = %file.path, agent = %file.agent_id, chunks = chunks.len(), "file indexed");
        Ok(())
    }

    /// Remove a file and everything derived from it.
    pub fn delete_file(&mut self, path: &str, agent_id: &str) -> MemoryResult<()> {
        let fts = self.status.fts.available;
        let has_vector_table = self.status.vector.available && self.vector_dims()?.is_some();

        let tx = self.conn.transaction()?;
        delete_file_chunks(&tx, path, agent_id, fts, has_vector_table)?;
        tx.execute(
            "DELETE FROM files WHERE path = ?1 AND agent_id = ?2",
            params![path, agent_id],
        )?;
        tx.commit()?;
        debug!(path, agent = agent_id, "file removed from index");
        Ok(())
    }

    pub fn counts(&self) -> MemoryResult<(usize, usize)> {
        let files: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok((files as usize, chunks as usize))
    }

    /// Ids of every chunk stored for a file, in line order.
    pub fn chunk_ids(&self, path: &str, agent_id: &str) -> MemoryResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM chunks WHERE path = ?1 AND agent_id = ?2 ORDER BY start_line, id",
        )?;
        let ids = stmt
            .query_map(params![path, agent_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn vector_dims(&self) -> MemoryResult<Option<usize>> {
        schema::vector_table_dims(&self.conn)
    }

    // -- queries -----------------------------------------------------------

    /// Keyword channel. Scores are `1 / (1 + max(0, rank))` and results
    /// below `min_score` are dropped.
    pub fn query_full_text(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
    ) -> MemoryResult<Vec<StoreHit>> {
        if !self.status.fts.available || limit == 0 {
            return Ok(Vec::new());
        }
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, path, agent_id, source, start_line, end_line, text, bm25({FTS_TABLE}) AS rank
             FROM {FTS_TABLE}
             WHERE {FTS_TABLE} MATCH ?1
             ORDER BY rank ASC
             LIMIT ?2"
        ))?;
        let hits = stmt
            .query_map(params![fts_query, limit as i64], |row| {
                let rank: f64 = row.get(7)?;
                self.hit_from_row(row, bm25_rank_to_score(rank))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(hits.into_iter().filter(|h| h.score >= min_score).collect())
    }

    /// Vector channel. Uses sqlite-vec when available and falls back to an
    /// in-process cosine scan over stored embeddings otherwise. Only chunks
    /// embedded by `model` are considered.
    pub fn query_vector(
        &self,
        embedding: &[f32],
        limit: usize,
        model: &str,
    ) -> MemoryResult<Vec<StoreHit>> {
        if embedding.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        if self.status.vector.available && self.vector_dims()? == Some(embedding.len()) {
            match self.query_vector_native(embedding, limit, model) {
                Ok(hits) => return Ok(hits),
                Err(e) => warn!(error = %e, "vector query failed, scanning embeddings instead"),
            }
        }
        self.query_vector_scan(embedding, limit, model)
    }

    fn query_vector_native(
        &self,
        embedding: &[f32],
        limit: usize,
        model: &str,
    ) -> MemoryResult<Vec<StoreHit>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT c.id, c.path, c.agent_id, c.source, c.start_line, c.end_line, c.text,
                    vec_distance_cosine(v.embedding, ?1) AS dist
             FROM {VECTOR_TABLE} v
             JOIN chunks c ON c.id = v.id
             WHERE c.model = ?2
             ORDER BY dist ASC
             LIMIT ?3"
        ))?;
        let hits = stmt
            .query_map(params![vec_to_blob(embedding), model, limit as i64], |row| {
                let dist: f64 = row.get(7)?;
                self.hit_from_row(row, 1.0 - dist)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    fn query_vector_scan(
        &self,
        embedding: &[f32],
        limit: usize,
        model: &str,
    ) -> MemoryResult<Vec<StoreHit>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, agent_id, source, start_line, end_line, text, embedding
             FROM chunks WHERE model = ?1",
        )?;
        let mut rows = stmt.query(params![model])?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(7)?;
            let Some(stored) = parse_embedding(&raw) else {
                continue;
            };
            if stored.len() != embedding.len() {
                continue;
            }
            let score = cosine_similarity(embedding, &stored);
            hits.push(self.hit_from_row(row, score)?);
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    fn hit_from_row(&self, row: &Row<'_>, score: f64) -> rusqlite::Result<StoreHit> {
        let source: String = row.get(3)?;
        let text: String = row.get(6)?;
        Ok(StoreHit {
            id: row.get(0)?,
            path: row.get(1)?,
            agent_id: row.get(2)?,
            source: source.parse().unwrap_or_default(),
            start_line: row.get(4)?,
            end_line: row.get(5)?,
            snippet: truncate_snippet(&text, self.snippet_max_chars),
            score,
        })
    }

    // -- session watermarks ------------------------------------------------

    /// Advance the watermark for `session_id`. Watermarks never move back.
    pub fn set_watermark(&self, session_id: &str, line: u64) -> MemoryResult<()> {
        self.conn.execute(
            "INSERT INTO session_watermarks (session_id, line, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                line = MAX(line, excluded.line),
                updated_at = excluded.updated_at",
            params![session_id, line as i64, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }
}

impl WatermarkStore for MemoryStore {
    fn watermark(&self, session_id: &str) -> MemoryResult<u64> {
        let line: Option<i64> = self
            .conn
            .query_row(
                "SELECT line FROM session_watermarks WHERE session_id = ?1",
                [session_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(line.unwrap_or(0).max(0) as u64)
    }
}

fn delete_file_chunks(
    conn: &Connection,
    path: &str,
    agent_id: &str,
    fts: bool,
    vector: bool,
) -> MemoryResult<()> {
    if vector {
        conn.execute(
            &format!(
                "DELETE FROM {VECTOR_TABLE} WHERE id IN
                    (SELECT id FROM chunks WHERE path = ?1 AND agent_id = ?2)"
            ),
            params![path, agent_id],
        )?;
    }
    if fts {
        conn.execute(
            &format!("DELETE FROM {FTS_TABLE} WHERE path = ?1 AND agent_id = ?2"),
            params![path, agent_id],
        )?;
    }
    conn.execute(
        "DELETE FROM chunks WHERE path = ?1 AND agent_id = ?2",
        params![path, agent_id],
    )?;
    Ok(())
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let source: String = row.get(2)?;
    Ok(FileRecord {
        path: row.get(0)?,
        agent_id: row.get(1)?,
        source: source.parse().unwrap_or_default(),
        hash: row.get(3)?,
        mtime_ms: row.get(4)?,
        size: row.get(5)?,
    })
}

/// Build an FTS5 query: alphanumeric/underscore tokens, each quoted, joined
/// with AND. `None` when the query has no usable tokens.
pub fn build_fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = raw
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" AND "))
    }
}

/// Map an FTS5 bm25 rank (lower is better) onto `(0, 1]`.
pub fn bm25_rank_to_score(rank: f64) -> f64 {
    let normalized = if rank.is_finite() { rank.max(0.0) } else { 999.0 };
    1.0 / (1.0 + normalized)
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.into(),
            agent_id: "main".into(),
            source: MemorySource::Memory,
            hash: format!("hash-{path}"),
            mtime_ms: 1,
            size: 10,
        }
    }

    fn chunk(path: &str, id: &str, text: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.into(),
            path: path.into(),
            agent_id: "main".into(),
            source: MemorySource::Memory,
            start_line: 1,
            end_line: 2,
            hash: format!("h-{id}"),
            model: "m".into(),
            text: text.into(),
            embedding,
        }
    }

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory(false, 700).unwrap()
    }

    fn fts_rows(store: &MemoryStore) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM chunks_fts", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn fts_query_builder() {
        assert_eq!(
            build_fts_query("deploy-checklist v2!").as_deref(),
            Some("\"deploy\" AND \"checklist\" AND \"v2\"")
        );
        assert_eq!(build_fts_query("snake_case"), Some("\"snake_case\"".into()));
        assert_eq!(build_fts_query("?? -- !!"), None);
    }

    #[test]
    fn rank_conversion() {
        assert_eq!(bm25_rank_to_score(0.0), 1.0);
        assert_eq!(bm25_rank_to_score(-3.0), 1.0);
        assert_eq!(bm25_rank_to_score(1.0), 0.5);
        assert!(bm25_rank_to_score(f64::NAN) < 0.01);
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        assert_eq!(truncate_snippet("héllo wörld", 4), "héll");
        assert_eq!(truncate_snippet("short", 700), "short");
    }

    #[test]
    fn replace_file_swaps_chunk_set() {
        let mut store = store();
        store
            .replace_file(
                &file("MEMORY.md"),
                &[
                    chunk("MEMORY.md", "a", "alpha", vec![]),
                    chunk("MEMORY.md", "b", "beta", vec![]),
                ],
            )
            .unwrap();
        store
            .replace_file(&file("MEMORY.md"), &[chunk("MEMORY.md", "c", "gamma", vec![])])
            .unwrap();

        assert_eq!(store.chunk_ids("MEMORY.md", "main").unwrap(), vec!["c"]);
        assert_eq!(fts_rows(&store), 1);
        assert_eq!(store.counts().unwrap(), (1, 1));
    }

    #[test]
    fn failed_replace_keeps_previous_state() {
        let mut store = store();
        store
            .replace_file(&file("MEMORY.md"), &[chunk("MEMORY.md", "a", "alpha", vec![])])
            .unwrap();

        // Duplicate ids violate the primary key half-way through.
        let mut changed = file("MEMORY.md");
        changed.hash = "new".into();
        let err = store.replace_file(
            &changed,
            &[
                chunk("MEMORY.md", "x", "one", vec![]),
                chunk("MEMORY.md", "x", "two", vec![]),
            ],
        );

        assert!(err.is_err());
        assert_eq!(store.chunk_ids("MEMORY.md", "main").unwrap(), vec!["a"]);
        assert_eq!(
            store.get_file("MEMORY.md", "main").unwrap().unwrap().hash,
            "hash-MEMORY.md"
        );
        assert_eq!(fts_rows(&store), 1);
    }

    #[test]
    fn delete_file_removes_derived_rows() {
        let mut store = store();
        store
            .replace_file(&file("memory/a.md"), &[chunk("memory/a.md", "a", "alpha", vec![])])
            .unwrap();
        store.delete_file("memory/a.md", "main").unwrap();

        assert_eq!(store.counts().unwrap(), (0, 0));
        assert_eq!(fts_rows(&store), 0);
        assert!(store.get_file("memory/a.md", "main").unwrap().is_none());
    }

    #[test]
    fn keyword_query_scores_and_filters() {
        let mut store = store();
        store
            .replace_file(
                &file("MEMORY.md"),
                &[
                    chunk("MEMORY.md", "a", "the deploy checklist lives in ops", vec![]),
                    chunk("MEMORY.md", "b", "lunch plans", vec![]),
                ],
            )
            .unwrap();

        let hits = store.query_full_text("deploy checklist", 10, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);

        assert!(store.query_full_text("deploy", 10, 1.1).unwrap().is_empty());
        assert!(store.query_full_text("!!!", 10, 0.0).unwrap().is_empty());
    }

    #[test]
    fn vector_scan_filters_by_model_and_dimensions() {
        let mut store = store();
        let mut other_model = chunk("MEMORY.md", "c", "gamma", vec![1.0, 0.0]);
        other_model.model = "other".into();
        store
            .replace_file(
                &file("MEMORY.md"),
                &[
                    chunk("MEMORY.md", "a", "alpha", vec![1.0, 0.0]),
                    chunk("MEMORY.md", "b", "beta", vec![0.0, 1.0]),
                    other_model,
                    chunk("MEMORY.md", "d", "delta", vec![1.0, 0.0, 0.0]),
                ],
            )
            .unwrap();

        let hits = store.query_vector(&[1.0, 0.0], 10, "m").unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((hits[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn watermarks_are_monotonic() {
        let store = store();
        assert_eq!(store.watermark("s").unwrap(), 0);
        store.set_watermark("s", 10).unwrap();
        store.set_watermark("s", 4).unwrap();
        assert_eq!(store.watermark("s").unwrap(), 10);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/index.sqlite");
        let store = MemoryStore::open(&path, true, 700).unwrap();
        assert!(path.exists());
        assert!(store.status().fts.available);
    }

    #[cfg(feature = "sqlite-vec")]
    fn ids_in(store: &MemoryStore, table: &str) -> Vec<String> {
        let mut stmt = store
            .connection()
            .prepare(&format!("SELECT id FROM {table} ORDER BY id"))
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap()
    }

    #[cfg(feature = "sqlite-vec")]
    #[test]
    fn vector_rows_mirror_chunks_through_replace_and_delete() {
        let mut store = MemoryStore::open_in_memory(true, 700).unwrap();
        assert!(store.status().vector.available);

        let chunks = [
            chunk("MEMORY.md", "a", "alpha", vec![1.0, 0.0, 0.0]),
            chunk("MEMORY.md", "b", "beta", vec![0.0, 1.0, 0.0]),
        ];
        store.replace_file(&file("MEMORY.md"), &chunks).unwrap();
        store.replace_file(&file("MEMORY.md"), &chunks).unwrap();

        assert_eq!(store.vector_dims().unwrap(), Some(3));
        assert_eq!(ids_in(&store, "chunks"), vec!["a", "b"]);
        assert_eq!(ids_in(&store, FTS_TABLE), vec!["a", "b"]);
        assert_eq!(ids_in(&store, VECTOR_TABLE), vec!["a", "b"]);

        let hits = store.query_vector(&[0.0, 1.0, 0.0], 1, "m").unwrap();
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-5);

        store
            .replace_file(&file("MEMORY.md"), &[chunk("MEMORY.md", "c", "gamma", vec![0.0, 0.0, 1.0])])
            .unwrap();
        assert_eq!(ids_in(&store, VECTOR_TABLE), vec!["c"]);
        assert_eq!(ids_in(&store, FTS_TABLE), vec!["c"]);

        store.delete_file("MEMORY.md", "main").unwrap();
        assert!(ids_in(&store, "chunks").is_empty());
        assert!(ids_in(&store, FTS_TABLE).is_empty());
        assert!(ids_in(&store, VECTOR_TABLE).is_empty());
    }

    #[cfg(feature = "sqlite-vec")]
    #[test]
    fn new_dimensions_recreate_vector_table() {
        let mut store = MemoryStore::open_in_memory(true, 700).unwrap();
        store
            .replace_file(&file("memory/a.md"), &[chunk("memory/a.md", "a", "alpha", vec![1.0, 0.0])])
            .unwrap();
        assert_eq!(store.vector_dims().unwrap(), Some(2));

        store
            .replace_file(
                &file("memory/b.md"),
                &[chunk("memory/b.md", "b", "beta", vec![0.0, 0.0, 0.0, 1.0])],
            )
            .unwrap();
        assert_eq!(store.vector_dims().unwrap(), Some(4));
        assert_eq!(ids_in(&store, VECTOR_TABLE), vec!["b"]);

        let hits = store.query_vector(&[0.0, 0.0, 0.0, 1.0], 5, "m").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");

        // Old-dimension chunks remain reachable through the scan path.
        let old = store.query_vector(&[1.0, 0.0], 5, "m").unwrap();
        assert_eq!(old[0].id, "a");
    }
}
