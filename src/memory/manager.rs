use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::{
    EmbeddingFallback, EmbeddingIdentity, MemorySource, ResolvedConfig, SyncPolicy,
};

use super::cache::EmbeddingCache;
use super::embeddings::{create_provider, EmbeddingProvider, EmbeddingProviderBox};
use super::error::{MemoryError, MemoryResult};
use super::files::{file_stamp, list_memory_files, list_session_files, FileStamp};
use super::indexer::{Indexer, SyncPlan};
use super::search::{hybrid_search, MemorySearchOptions, MemorySearchResult};
use super::sessions::{evaluate_delta, should_flush};
use super::store::MemoryStore;
use super::types::{IndexStatus, SyncOptions, SyncReason, SyncReport};

/// Meta key holding the fingerprint of the settings the index was built with.
const INDEX_FINGERPRINT_KEY: &str = "index_fingerprint";

// ---------------------------------------------------------------------------
// MemoryIndexManager
// ---------------------------------------------------------------------------

/// Owns the SQLite store, embedding provider, and dirty state for one
/// manager key.
///
/// Lives entirely inside the worker host; nothing here is shared across
/// threads.
pub struct MemoryIndexManager {
    config: ResolvedConfig,
    store: MemoryStore,
    provider: Option<EmbeddingProviderBox>,
    provider_error: Option<String>,
    fingerprint: String,
    memory_dirty: bool,
    dirty_sessions: BTreeSet<PathBuf>,
    needs_full_reindex: bool,
    memory_stamps: HashMap<PathBuf, FileStamp>,
    session_stamps: HashMap<PathBuf, FileStamp>,
}

impl MemoryIndexManager {
    /// Open (or create) the index described by `config`.
    ///
    /// Fails when the store cannot be opened, or when the embedding
    /// provider cannot be built and the fallback is `none`.
    pub fn open(config: ResolvedConfig) -> MemoryResult<Self> {
        let (provider, provider_error) = match create_provider(&config.embedding) {
            Ok(provider) => (provider, None),
            Err(e) => match config.embedding.fallback {
                EmbeddingFallback::KeywordOnly => {
                    warn!(
                        key = %config.key(),
                        error = %e,
                        "embedding provider unavailable, continuing with keyword search"
                    );
                    (None, Some(e.to_string()))
                }
                EmbeddingFallback::Fail => return Err(e),
            },
        };
        Self::with_provider(config, provider, provider_error)
    }

    pub(crate) fn with_provider(
        config: ResolvedConfig,
        provider: Option<EmbeddingProviderBox>,
        provider_error: Option<String>,
    ) -> MemoryResult<Self> {
        let store = MemoryStore::open(
            &config.store_path,
            config.vector_enabled,
            config.query.snippet_max_chars,
        )?;

        let identity = provider.as_deref().map(embedding_identity);
        let fingerprint = config.index_fingerprint(identity.as_ref());
        let stored = store.read_meta(INDEX_FINGERPRINT_KEY)?;
        let needs_full_reindex = stored.as_deref() != Some(fingerprint.as_str());
        if needs_full_reindex && stored.is_some() {
            info!(key = %config.key(), "index settings changed, full reindex scheduled");
        }

        info!(
            key = %config.key(),
            store = %config.store_path.display(),
            provider = provider.as_ref().map(|p| p.id().to_string()).as_deref().unwrap_or("none"),
            fts = store.status().fts.available,
            vector = store.status().vector.available,
            "memory index manager ready"
        );

        Ok(Self {
            config,
            store,
            provider,
            provider_error,
            fingerprint,
            memory_dirty: true,
            dirty_sessions: BTreeSet::new(),
            needs_full_reindex,
            memory_stamps: HashMap::new(),
            session_stamps: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn sync_policy(&self) -> &SyncPolicy {
        &self.config.sync
    }

    /// Execute a hybrid search and return results sorted by descending score.
    pub async fn search(
        &self,
        query: &str,
        options: &MemorySearchOptions,
    ) -> MemoryResult<Vec<MemorySearchResult>> {
        hybrid_search(
            &self.store,
            self.provider.as_deref(),
            &self.config.query,
            query,
            options,
        )
        .await
    }

    /// Run a sync pass for `options.reason`, or report it skipped when the
    /// matching trigger is disabled.
    pub async fn sync(&mut self, options: SyncOptions) -> MemoryResult<SyncReport> {
        let reason = options.reason;
        if !self.trigger_enabled(reason) {
            debug!(key = %self.config.key(), ?reason, "sync trigger disabled, skipping");
            return Ok(SyncReport::skipped(reason));
        }

        let plan = SyncPlan {
            reason,
            memory: !reason.is_session_flush(),
            sessions: true,
            session_files: options.session_files,
            force: options.force || self.needs_full_reindex,
        };
        self.run(plan).await
    }

    /// Sync only what is known to be dirty.
    pub async fn sync_dirty(&mut self) -> MemoryResult<SyncReport> {
        if !self.is_dirty() {
            return Ok(SyncReport::new(SyncReason::Manual));
        }
        let memory = self.memory_dirty || self.needs_full_reindex;
        let plan = SyncPlan {
            reason: SyncReason::Manual,
            memory,
            sessions: !self.dirty_sessions.is_empty() || self.needs_full_reindex,
            session_files: if self.needs_full_reindex {
                Vec::new()
            } else {
                self.dirty_sessions.iter().cloned().collect()
            },
            force: self.needs_full_reindex,
        };
        self.run(plan).await
    }

    async fn run(&mut self, plan: SyncPlan) -> MemoryResult<SyncReport> {
        let full_pass = plan.memory && plan.sessions && plan.session_files.is_empty();
        let report = Indexer::new(&mut self.store, self.provider.as_deref(), &self.config)
            .run(&plan)
            .await?;

        self.refresh_stamps();

        if let Some(first) = report.failures.first() {
            return Err(MemoryError::PartialSync {
                failed: report.failures.len(),
                first: format!("{}: {}", first.path, first.message),
            });
        }

        if plan.memory {
            self.memory_dirty = false;
        }
        if plan.sessions {
            if plan.session_files.is_empty() {
                self.dirty_sessions.clear();
            } else {
                for path in &plan.session_files {
                    self.dirty_sessions.remove(path);
                }
            }
        }
        if full_pass && self.needs_full_reindex {
            self.store
                .write_meta(INDEX_FINGERPRINT_KEY, &self.fingerprint)?;
            self.needs_full_reindex = false;
        }
        Ok(report)
    }

    fn trigger_enabled(&self, reason: SyncReason) -> bool {
        let sync = &self.config.sync;
        let flush = &self.config.flush;
        match reason {
            SyncReason::Manual => true,
            SyncReason::SessionStart => sync.on_session_start,
            SyncReason::Search => sync.on_search,
            SyncReason::Watch => sync.watch,
            SyncReason::Interval => sync.interval.is_some(),
            SyncReason::SessionSwitch => flush.on_session_switch,
            SyncReason::Compaction => flush.on_compaction,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.memory_dirty || self.needs_full_reindex || !self.dirty_sessions.is_empty()
    }

    /// Re-stamp watched files and mark the index dirty on change.
    ///
    /// Memory files are dirty on any stamp change. A changed transcript is
    /// dirty only once its unflushed delta crosses a flush threshold. A
    /// transcript that cannot be evaluated is logged and retried on its next
    /// change.
    pub fn poll_changes(&mut self) -> MemoryResult<bool> {
        let memory = self.collect_memory_stamps();
        if memory != self.memory_stamps {
            if !self.memory_dirty {
                debug!(key = %self.config.key(), "memory files changed");
            }
            self.memory_dirty = true;
            self.memory_stamps = memory;
        }

        let sessions = self.collect_session_stamps();
        for (path, stamp) in &sessions {
            if self.session_stamps.get(path) == Some(stamp) {
                continue;
            }
            match evaluate_delta(path, &self.store) {
                Ok(delta) if should_flush(&delta, &self.config.flush.thresholds) => {
                    self.dirty_sessions.insert(path.clone());
                }
                Ok(_) => {}
                Err(e) => warn!(
                    key = %self.config.key(),
                    path = %path.display(),
                    error = %e,
                    "session delta evaluation failed"
                ),
            }
        }
        self.session_stamps = sessions;

        Ok(self.is_dirty())
    }

    pub fn status(&self) -> MemoryResult<IndexStatus> {
        let (files, chunks) = self.store.counts()?;
        let cache_entries = EmbeddingCache::new(self.store.connection()).total()?;
        let schema = self.store.status();

        Ok(IndexStatus {
            key: self.config.key(),
            agent_ids: self
                .config
                .agents
                .iter()
                .map(|a| a.agent_id.clone())
                .collect(),
            sources: self.config.sources.clone(),
            store_path: self.config.store_path.display().to_string(),
            files,
            chunks,
            dirty: self.is_dirty(),
            provider: self.provider.as_ref().map(|p| p.id().to_string()),
            model: self.provider.as_ref().map(|p| p.model_name()),
            provider_error: self.provider_error.clone(),
            fts: schema.fts.clone(),
            vector: schema.vector.clone(),
            cache_entries,
        })
    }

    fn refresh_stamps(&mut self) {
        self.memory_stamps = self.collect_memory_stamps();
        self.session_stamps = self.collect_session_stamps();
    }

    fn collect_memory_stamps(&self) -> HashMap<PathBuf, FileStamp> {
        if !self.config.has_source(MemorySource::Memory) {
            return HashMap::new();
        }
        self.config
            .agents
            .iter()
            .flat_map(|agent| list_memory_files(&agent.workspace_dir, &self.config.extra_paths))
            .filter_map(|path| file_stamp(&path).map(|stamp| (path, stamp)))
            .collect()
    }

    fn collect_session_stamps(&self) -> HashMap<PathBuf, FileStamp> {
        if !self.config.has_source(MemorySource::Sessions) {
            return HashMap::new();
        }
        self.config
            .agents
            .iter()
            .flat_map(|agent| list_session_files(&agent.sessions_dir))
            .filter_map(|path| file_stamp(&path).map(|stamp| (path, stamp)))
            .collect()
    }
}

fn embedding_identity(provider: &dyn EmbeddingProvider) -> EmbeddingIdentity {
    EmbeddingIdentity {
        provider: provider.id().to_string(),
        model: provider.model_name(),
        provider_key: provider.provider_key(),
        dimensions: provider.dimensions(),
    }
}
