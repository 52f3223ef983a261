use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::MemoryResult;

/// Current schema version.  Increment when adding new migrations.
const SCHEMA_VERSION: u32 = 2;

pub const FTS_TABLE: &str = "chunks_fts";
pub const VECTOR_TABLE: &str = "chunks_vec";
pub const EMBEDDING_CACHE_TABLE: &str = "embedding_cache";

const META_VECTOR_DIMS: &str = "vector_dims";

/// Whether an optional store capability could be enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapabilityStatus {
    fn available() -> Self {
        Self {
            available: true,
            error: None,
        }
    }

    fn unavailable(error: impl Into<String>) -> Self {
        Self {
            available: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaStatus {
    pub fts: CapabilityStatus,
    pub vector: CapabilityStatus,
}

/// Register the sqlite-vec extension for every connection opened
/// afterwards in this process.
#[cfg(feature = "sqlite-vec")]
pub fn register_vector_extension() {
    static REGISTER: std::sync::Once = std::sync::Once::new();
    REGISTER.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

#[cfg(not(feature = "sqlite-vec"))]
pub fn register_vector_extension() {}

/// Create or upgrade every table the index needs.
///
/// Safe to run against an existing database: tables are created with
/// `IF NOT EXISTS`, columns added by later versions are back-filled, and
/// the optional FTS and vector capabilities are detected rather than
/// required.
pub fn ensure_schema(conn: &Connection, vector_enabled: bool) -> MemoryResult<SchemaStatus> {
    // Enable WAL mode for better concurrent read performance.
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    // ------------------------------------------------------------------
    // meta: tracks schema version and arbitrary key/value pairs.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
        debug!(version = SCHEMA_VERSION, "memory schema migrated");
    } else {
        debug!(version = current_version, "memory schema up to date");
    }

    let fts = ensure_fts_table(conn);
    let vector = if vector_enabled {
        detect_vector_extension(conn)
    } else {
        CapabilityStatus::unavailable("vector search disabled by config")
    };

    Ok(SchemaStatus { fts, vector })
}

// ---------------------------------------------------------------------------
// v1: core tables
// ---------------------------------------------------------------------------

fn migrate_v1(conn: &Connection) -> MemoryResult<()> {
    // ------------------------------------------------------------------
    // files: one row per indexed source file.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            path   TEXT    NOT NULL,
            source TEXT    NOT NULL DEFAULT 'memory',
            hash   TEXT    NOT NULL,
            mtime  INTEGER NOT NULL,
            size   INTEGER NOT NULL
        );",
    )?;

    // ------------------------------------------------------------------
    // chunks: text fragments with their embeddings stored as JSON.
    // ------------------------------------------------------------------
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            id         TEXT    PRIMARY KEY,
            path       TEXT    NOT NULL,
            source     TEXT    NOT NULL DEFAULT 'memory',
            start_line INTEGER NOT NULL,
            end_line   INTEGER NOT NULL,
            hash       TEXT    NOT NULL,
            model      TEXT    NOT NULL,
            text       TEXT    NOT NULL,
            embedding  TEXT    NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);
        CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);",
    )?;

    // ------------------------------------------------------------------
    // embedding_cache: vectors keyed by provider/model/key/content hash
    // so unchanged content is never re-embedded.
    // ------------------------------------------------------------------
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {EMBEDDING_CACHE_TABLE} (
            provider     TEXT    NOT NULL,
            model        TEXT    NOT NULL,
            provider_key TEXT    NOT NULL,
            hash         TEXT    NOT NULL,
            embedding    TEXT    NOT NULL,
            dims         INTEGER,
            updated_at   INTEGER NOT NULL,
            PRIMARY KEY (provider, model, provider_key, hash)
        );
        CREATE INDEX IF NOT EXISTS idx_embedding_cache_updated_at
            ON {EMBEDDING_CACHE_TABLE}(updated_at);"
    ))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// v2: agent tagging and session watermarks
// ---------------------------------------------------------------------------

fn migrate_v2(conn: &Connection) -> MemoryResult<()> {
    ensure_column(conn, "files", "agent_id", "TEXT NOT NULL DEFAULT ''")?;
    ensure_column(conn, "chunks", "agent_id", "TEXT NOT NULL DEFAULT ''")?;

    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_path_agent ON files(path, agent_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_path_agent ON chunks(path, agent_id);

        CREATE TABLE IF NOT EXISTS session_watermarks (
            session_id TEXT    PRIMARY KEY,
            line       INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    )?;

    Ok(())
}

/// Add `column` to `table` when an older schema lacks it.
fn ensure_column(conn: &Connection, table: &str, column: &str, definition: &str) -> MemoryResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .any(|name| name == column);
    drop(stmt);

    if !exists {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition};"))?;
        debug!(table, column, "added missing column");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Optional capabilities
// ---------------------------------------------------------------------------

fn ensure_fts_table(conn: &Connection) -> CapabilityStatus {
    let sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {FTS_TABLE} USING fts5(
            text,
            id UNINDEXED,
            path UNINDEXED,
            agent_id UNINDEXED,
            source UNINDEXED,
            model UNINDEXED,
            start_line UNINDEXED,
            end_line UNINDEXED
        );"
    );
    match conn.execute_batch(&sql) {
        Ok(()) => CapabilityStatus::available(),
        Err(e) => {
            warn!(error = %e, "full-text search unavailable");
            CapabilityStatus::unavailable(e.to_string())
        }
    }
}

fn detect_vector_extension(conn: &Connection) -> CapabilityStatus {
    match conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0)) {
        Ok(version) => {
            debug!(%version, "sqlite-vec loaded");
            CapabilityStatus::available()
        }
        Err(e) => {
            warn!(error = %e, "vector extension unavailable, using in-process similarity");
            CapabilityStatus::unavailable(e.to_string())
        }
    }
}

/// Create the vector table for `dims`, recreating it when the stored
/// dimensionality differs.
pub fn ensure_vector_table(conn: &Connection, dims: usize) -> MemoryResult<()> {
    let current = read_meta(conn, META_VECTOR_DIMS)?.and_then(|v| v.parse::<usize>().ok());
    if current == Some(dims) {
        return Ok(());
    }
    if current.is_some() {
        debug!(from = ?current, to = dims, "vector dimensions changed, recreating table");
    }

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {VECTOR_TABLE};
        CREATE VIRTUAL TABLE {VECTOR_TABLE} USING vec0(
            id TEXT PRIMARY KEY,
            embedding FLOAT[{dims}] distance_metric=cosine
        );"
    ))?;
    write_meta(conn, META_VECTOR_DIMS, &dims.to_string())?;
    Ok(())
}

/// Dimensionality of the current vector table, if one exists.
pub fn vector_table_dims(conn: &Connection) -> MemoryResult<Option<usize>> {
    Ok(read_meta(conn, META_VECTOR_DIMS)?.and_then(|v| v.parse().ok()))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn read_meta(conn: &Connection, key: &str) -> MemoryResult<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0))
        .optional()?)
}

pub fn write_meta(conn: &Connection, key: &str, value: &str) -> MemoryResult<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn get_schema_version(conn: &Connection) -> u32 {
    read_meta(conn, "schema_version")
        .ok()
        .flatten()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: u32) -> MemoryResult<()> {
    write_meta(conn, "schema_version", &version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})")).unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let first = ensure_schema(&conn, false).unwrap();
        let second = ensure_schema(&conn, false).unwrap();

        assert_eq!(first, second);
        assert!(first.fts.available);
        assert!(!first.vector.available);
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn v1_database_gains_agent_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             INSERT INTO meta VALUES ('schema_version', '1');",
        )
        .unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO files (path, source, hash, mtime, size) VALUES ('MEMORY.md', 'memory', 'h', 1, 2)",
            [],
        )
        .unwrap();

        ensure_schema(&conn, false).unwrap();

        assert!(columns(&conn, "files").contains(&"agent_id".to_string()));
        assert!(columns(&conn, "chunks").contains(&"agent_id".to_string()));
        let agent: String = conn
            .query_row("SELECT agent_id FROM files WHERE path = 'MEMORY.md'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(agent, "");
    }

    #[test]
    fn meta_round_trips_and_overwrites() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, false).unwrap();

        assert_eq!(read_meta(&conn, "fingerprint").unwrap(), None);
        write_meta(&conn, "fingerprint", "a").unwrap();
        write_meta(&conn, "fingerprint", "b").unwrap();
        assert_eq!(read_meta(&conn, "fingerprint").unwrap().as_deref(), Some("b"));
    }
}
