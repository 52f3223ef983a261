//! Shared request/response types and the capability traits a search
//! manager may implement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::MemorySource;

use super::error::MemoryResult;
use super::schema::CapabilityStatus;
use super::search::{MemorySearchOptions, MemorySearchResult};

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Why a sync was requested. Each reason is gated by its own config
/// trigger; `Manual` always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SyncReason {
    #[default]
    Manual,
    SessionStart,
    SessionSwitch,
    Compaction,
    Search,
    Watch,
    Interval,
}

impl SyncReason {
    /// Reasons that only flush session transcripts.
    pub fn is_session_flush(&self) -> bool {
        matches!(self, SyncReason::SessionSwitch | SyncReason::Compaction)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(default)]
    pub reason: SyncReason,
    /// Reindex every file even when its hash is unchanged.
    #[serde(default)]
    pub force: bool,
    /// Restrict the session part of the pass to these transcripts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_files: Vec<PathBuf>,
}

impl SyncOptions {
    pub fn reason(reason: SyncReason) -> Self {
        Self {
            reason,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub path: String,
    pub agent_id: String,
    pub message: String,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub reason: SyncReason,
    /// The trigger for `reason` is disabled; nothing ran.
    pub skipped: bool,
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub sessions_flushed: usize,
    pub chunks_embedded: usize,
    pub cache_hits: usize,
    pub cache_pruned: usize,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn new(reason: SyncReason) -> Self {
        Self {
            reason,
            ..Default::default()
        }
    }

    pub fn skipped(reason: SyncReason) -> Self {
        Self {
            reason,
            skipped: true,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub key: String,
    pub agent_ids: Vec<String>,
    pub sources: Vec<MemorySource>,
    pub store_path: String,
    pub files: usize,
    pub chunks: usize,
    pub dirty: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_error: Option<String>,
    pub fts: CapabilityStatus,
    pub vector: CapabilityStatus,
    pub cache_entries: usize,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Base capability every search manager has.
#[async_trait]
pub trait MemorySearchManager: Send + Sync {
    async fn search(
        &self,
        query: &str,
        options: MemorySearchOptions,
    ) -> MemoryResult<Vec<MemorySearchResult>>;

    async fn status(&self) -> MemoryResult<IndexStatus>;

    fn as_syncable(&self) -> Option<&dyn Syncable> {
        None
    }

    fn as_dirty_observable(&self) -> Option<&dyn DirtyObservable> {
        None
    }

    fn as_closable(&self) -> Option<&dyn Closable> {
        None
    }
}

#[async_trait]
pub trait Syncable: Send + Sync {
    async fn sync(&self, options: SyncOptions) -> MemoryResult<SyncReport>;

    /// Sync only what is known to be dirty; a no-op when clean.
    async fn sync_dirty(&self) -> MemoryResult<SyncReport>;
}

pub trait DirtyObservable: Send + Sync {
    fn is_dirty(&self) -> bool;
}

#[async_trait]
pub trait Closable: Send + Sync {
    /// Release the manager. Idempotent.
    async fn close(&self) -> MemoryResult<()>;
}
