//! Incremental sync pass.
//!
//! Brings the store into agreement with the files on disk. Unchanged files
//! (same content hash) are skipped; changed files are re-chunked, embedded
//! through the cache, and replaced atomically. A file that fails keeps its
//! previous index state and is reported in the [`SyncReport`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::{
    AgentPaths, MemorySource, ResolvedConfig, EMBEDDING_BATCH_MAX_TOKENS, FTS_ONLY_MODEL,
};

use super::cache::{CacheScope, EmbeddingCache};
use super::chunking::{chunk_text, estimate_tokens, hash_text, TextChunk};
use super::embeddings::{embed_texts, EmbeddingProvider};
use super::error::MemoryResult;
use super::files::{
    build_file_entry, list_memory_files, list_session_files, memory_path_key, session_path_key,
    MemoryFileEntry,
};
use super::sessions::{evaluate_delta, should_flush, SessionDelta};
use super::store::{ChunkRecord, FileRecord, MemoryStore};
use super::types::{SyncFailure, SyncReason, SyncReport};

/// What one pass covers.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub reason: SyncReason,
    pub memory: bool,
    pub sessions: bool,
    /// Restrict the session part to these transcripts; empty means all.
    pub session_files: Vec<PathBuf>,
    /// Reindex files whose hash is unchanged.
    pub force: bool,
}

impl SyncPlan {
    /// Passive reasons only flush a transcript once its delta crosses a
    /// threshold; explicit ones flush any unconsumed growth.
    fn requires_threshold(&self) -> bool {
        matches!(
            self.reason,
            SyncReason::Watch | SyncReason::Interval | SyncReason::Search
        )
    }
}

/// Borrowed context for one pass.
pub struct Indexer<'a> {
    store: &'a mut MemoryStore,
    provider: Option<&'a dyn EmbeddingProvider>,
    config: &'a ResolvedConfig,
}

struct Embedded {
    vectors: Vec<Vec<f32>>,
    cache_hits: usize,
    computed: usize,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a mut MemoryStore,
        provider: Option<&'a dyn EmbeddingProvider>,
        config: &'a ResolvedConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    pub async fn run(&mut self, plan: &SyncPlan) -> MemoryResult<SyncReport> {
        let mut report = SyncReport::new(plan.reason);
        let config = self.config;

        for agent in &config.agents {
            if plan.memory && config.has_source(MemorySource::Memory) {
                self.sync_memory_files(agent, plan.force, &mut report)
                    .await?;
            }
            if plan.sessions && config.has_source(MemorySource::Sessions) {
                self.sync_session_files(agent, plan, &mut report).await?;
            }
        }

        if let (Some(provider), true) = (self.provider, config.cache.enabled) {
            report.cache_pruned = EmbeddingCache::new(self.store.connection())
                .prune(&cache_scope(provider), config.cache.max_entries)?;
        }

        info!(
            reason = ?plan.reason,
            scanned = report.files_scanned,
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            removed = report.files_removed,
            sessions = report.sessions_flushed,
            failed = report.failures.len(),
            "memory sync complete"
        );
        Ok(report)
    }

    async fn sync_memory_files(
        &mut self,
        agent: &AgentPaths,
        force: bool,
        report: &mut SyncReport,
    ) -> MemoryResult<()> {
        let files = list_memory_files(&agent.workspace_dir, &self.config.extra_paths);
        let mut seen = HashSet::new();

        for abs in files {
            report.files_scanned += 1;
            let key = memory_path_key(&agent.workspace_dir, &abs);
            seen.insert(key.clone());

            let entry = match build_file_entry(&abs, key.clone(), &agent.agent_id, MemorySource::Memory)
            {
                Ok(entry) => entry,
                Err(e) => {
                    record_failure(report, &key, &agent.agent_id, &e.to_string());
                    continue;
                }
            };

            if !force && self.is_unchanged(&entry)? {
                report.files_unchanged += 1;
                continue;
            }

            match self.index_entry(&entry).await {
                Ok(embedded) => {
                    report.files_indexed += 1;
                    report.chunks_embedded += embedded.computed;
                    report.cache_hits += embedded.cache_hits;
                }
                Err(e) => record_failure(report, &key, &agent.agent_id, &e.to_string()),
            }
        }

        for stale in self.store.list_files(&agent.agent_id, MemorySource::Memory)? {
            if !seen.contains(&stale.path) {
                self.store.delete_file(&stale.path, &agent.agent_id)?;
                report.files_removed += 1;
            }
        }
        Ok(())
    }

    async fn sync_session_files(
        &mut self,
        agent: &AgentPaths,
        plan: &SyncPlan,
        report: &mut SyncReport,
    ) -> MemoryResult<()> {
        let all = list_session_files(&agent.sessions_dir);
        let targeted = !plan.session_files.is_empty();
        let files: Vec<PathBuf> = if targeted {
            all.iter()
                .filter(|p| plan.session_files.contains(p))
                .cloned()
                .collect()
        } else {
            all.clone()
        };

        for abs in files {
            report.files_scanned += 1;
            let key = session_path_key(&abs);

            let delta = match evaluate_delta(&abs, &*self.store) {
                Ok(delta) => delta,
                Err(e) => {
                    record_failure(report, &key, &agent.agent_id, &e.to_string());
                    continue;
                }
            };
            if !self.should_index_session(plan, &delta) {
                report.files_unchanged += 1;
                continue;
            }

            let entry = match build_file_entry(&abs, key.clone(), &agent.agent_id, MemorySource::Sessions)
            {
                Ok(entry) => entry,
                Err(e) => {
                    record_failure(report, &key, &agent.agent_id, &e.to_string());
                    continue;
                }
            };

            if !plan.force && self.is_unchanged(&entry)? {
                self.store.set_watermark(&delta.session_id, delta.total_lines)?;
                report.files_unchanged += 1;
                continue;
            }

            match self.index_entry(&entry).await {
                Ok(embedded) => {
                    self.store.set_watermark(&delta.session_id, delta.total_lines)?;
                    report.files_indexed += 1;
                    report.sessions_flushed += 1;
                    report.chunks_embedded += embedded.computed;
                    report.cache_hits += embedded.cache_hits;
                    debug!(
                        session = %delta.session_id,
                        lines = delta.total_lines,
                        "session transcript flushed"
                    );
                }
                Err(e) => record_failure(report, &key, &agent.agent_id, &e.to_string()),
            }
        }

        if !targeted {
            let present: HashSet<String> = all.iter().map(|p| session_path_key(p)).collect();
            for stale in self.store.list_files(&agent.agent_id, MemorySource::Sessions)? {
                if !present.contains(&stale.path) {
                    self.store.delete_file(&stale.path, &agent.agent_id)?;
                    report.files_removed += 1;
                }
            }
        }
        Ok(())
    }

    fn should_index_session(&self, plan: &SyncPlan, delta: &SessionDelta) -> bool {
        if plan.force {
            return true;
        }
        if delta.is_empty() {
            return false;
        }
        !plan.requires_threshold() || should_flush(delta, &self.config.flush.thresholds)
    }

    fn is_unchanged(&self, entry: &MemoryFileEntry) -> MemoryResult<bool> {
        Ok(self
            .store
            .get_file(&entry.path, &entry.agent_id)?
            .is_some_and(|existing| existing.hash == entry.hash))
    }

    async fn index_entry(&mut self, entry: &MemoryFileEntry) -> MemoryResult<Embedded> {
        let chunking = self.config.chunking;
        let chunks = chunk_text(&entry.content, chunking.tokens as u32, chunking.overlap as u32);

        let (embedded, model) = match self.provider {
            Some(provider) => (
                self.embed_chunks(provider, &chunks).await?,
                provider.model_name(),
            ),
            None => (
                Embedded {
                    vectors: vec![Vec::new(); chunks.len()],
                    cache_hits: 0,
                    computed: 0,
                },
                FTS_ONLY_MODEL.to_string(),
            ),
        };

        let records: Vec<ChunkRecord> = chunks
            .iter()
            .zip(embedded.vectors.iter())
            .enumerate()
            .map(|(ordinal, (chunk, vector))| ChunkRecord {
                id: chunk_id(entry, ordinal, chunk, &model),
                path: entry.path.clone(),
                agent_id: entry.agent_id.clone(),
                source: entry.source,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                hash: chunk.hash.clone(),
                model: model.clone(),
                text: chunk.text.clone(),
                embedding: vector.clone(),
            })
            .collect();

        let file = FileRecord {
            path: entry.path.clone(),
            agent_id: entry.agent_id.clone(),
            source: entry.source,
            hash: entry.hash.clone(),
            mtime_ms: entry.mtime_ms,
            size: entry.size,
        };
        self.store.replace_file(&file, &records)?;
        debug!(
            path = %entry.path,
            agent_id = %entry.agent_id,
            chunks = records.len(),
            "file indexed"
        );
        Ok(embedded)
    }

    /// Cache first, then the provider for misses in token-bounded batches.
    async fn embed_chunks(
        &self,
        provider: &dyn EmbeddingProvider,
        chunks: &[TextChunk],
    ) -> MemoryResult<Embedded> {
        let scope = cache_scope(provider);
        let use_cache = self.config.cache.enabled;

        let cached: HashMap<String, Vec<f32>> = if use_cache {
            let hashes: Vec<String> = chunks.iter().map(|c| c.hash.clone()).collect();
            EmbeddingCache::new(self.store.connection()).get_many(&scope, &hashes)?
        } else {
            HashMap::new()
        };

        let mut slots: Vec<Option<Vec<f32>>> =
            chunks.iter().map(|c| cached.get(&c.hash).cloned()).collect();
        let missing: Vec<usize> = (0..chunks.len()).filter(|i| slots[*i].is_none()).collect();
        let cache_hits = chunks.len() - missing.len();

        for batch in token_batches(&missing, chunks) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let vectors = embed_texts(provider, &texts).await?;
            for (&idx, vector) in batch.iter().zip(vectors) {
                if use_cache {
                    EmbeddingCache::new(self.store.connection()).put(
                        &scope,
                        &chunks[idx].hash,
                        &vector,
                    )?;
                }
                slots[idx] = Some(vector);
            }
        }

        Ok(Embedded {
            vectors: slots.into_iter().map(Option::unwrap_or_default).collect(),
            cache_hits,
            computed: missing.len(),
        })
    }
}

pub fn cache_scope(provider: &dyn EmbeddingProvider) -> CacheScope {
    CacheScope {
        provider: provider.id().to_string(),
        model: provider.model_name(),
        provider_key: provider.provider_key(),
    }
}

/// Group chunk indices so each batch stays under the token budget. A single
/// oversized chunk still gets a batch of its own.
fn token_batches(indices: &[usize], chunks: &[TextChunk]) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut tokens = 0usize;

    for &idx in indices {
        let cost = estimate_tokens(&chunks[idx].text).max(1);
        if !current.is_empty() && tokens + cost > EMBEDDING_BATCH_MAX_TOKENS {
            batches.push(std::mem::take(&mut current));
            tokens = 0;
        }
        current.push(idx);
        tokens += cost;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn chunk_id(entry: &MemoryFileEntry, ordinal: usize, chunk: &TextChunk, model: &str) -> String {
    hash_text(&format!(
        "{}:{}:{}:{}:{}:{}:{}:{}",
        entry.source,
        entry.agent_id,
        entry.path,
        ordinal,
        chunk.start_line,
        chunk.end_line,
        chunk.hash,
        model
    ))
}

fn record_failure(report: &mut SyncReport, path: &str, agent_id: &str, message: &str) {
    warn!(path, agent_id, error = message, "failed to index file");
    report.failures.push(SyncFailure {
        path: path.to_string(),
        agent_id: agent_id.to_string(),
        message: message.to_string(),
    });
}
