//! Resolution of the user-facing memory search config into the immutable
//! snapshot a manager runs against.

use super::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which agents a manager covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "agentId", rename_all = "lowercase")]
pub enum ResolvedScope {
    Agent(String),
    All,
}

impl ResolvedScope {
    /// Registry and store key for this scope.
    pub fn key(&self) -> String {
        match self {
            ResolvedScope::Agent(id) => format!("agent:{id}"),
            ResolvedScope::All => ALL_AGENTS_KEY.to_string(),
        }
    }

    fn store_token(&self) -> &str {
        match self {
            ResolvedScope::Agent(id) => id,
            ResolvedScope::All => ALL_AGENTS_KEY,
        }
    }
}

/// Filesystem locations for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPaths {
    pub agent_id: String,
    pub workspace_dir: PathBuf,
    pub sessions_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEmbedding {
    pub provider: EmbeddingProvider,
    pub fallback: EmbeddingFallback,
    pub model: String,
    pub model_path: Option<PathBuf>,
    pub model_cache_dir: Option<PathBuf>,
    pub dimensions: usize,
    pub max_input_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub tokens: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridParams {
    pub enabled: bool,
    pub vector_weight: f64,
    pub text_weight: f64,
    pub candidate_multiplier: usize,
    /// MMR lambda when diversity re-ranking is enabled.
    pub mmr_lambda: Option<f64>,
    /// Half-life in days when temporal decay is enabled.
    pub half_life_days: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryParams {
    pub max_results: usize,
    pub min_score: f64,
    pub hybrid: HybridParams,
    pub snippet_max_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub on_session_start: bool,
    pub on_search: bool,
    pub watch: bool,
    pub watch_debounce: Duration,
    pub interval: Option<Duration>,
}

/// Session delta thresholds. Both values are finite and non-negative; a
/// value of 0 disables that threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushThresholds {
    pub delta_bytes: u64,
    pub delta_messages: u64,
}

impl FlushThresholds {
    /// Normalise raw threshold values: missing, non-finite, or negative
    /// inputs become 0.
    pub fn normalized(delta_bytes: Option<f64>, delta_messages: Option<f64>) -> Self {
        fn clamp(value: Option<f64>) -> u64 {
            match value {
                Some(v) if v.is_finite() && v > 0.0 => v.floor() as u64,
                _ => 0,
            }
        }
        Self {
            delta_bytes: clamp(delta_bytes),
            delta_messages: clamp(delta_messages),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.delta_bytes > 0 || self.delta_messages > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub on_session_switch: bool,
    pub on_compaction: bool,
    pub thresholds: FlushThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheParams {
    pub enabled: bool,
    /// `None` disables pruning.
    pub max_entries: Option<usize>,
}

/// Immutable snapshot held by one manager for its whole lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub scope: ResolvedScope,
    pub agents: Vec<AgentPaths>,
    pub sources: Vec<MemorySource>,
    pub extra_paths: Vec<PathBuf>,
    pub store_path: PathBuf,
    pub vector_enabled: bool,
    pub embedding: ResolvedEmbedding,
    pub chunking: ChunkingParams,
    pub query: QueryParams,
    pub sync: SyncPolicy,
    pub flush: FlushPolicy,
    pub cache: CacheParams,
}

impl ResolvedConfig {
    pub fn key(&self) -> String {
        self.scope.key()
    }

    pub fn has_source(&self, source: MemorySource) -> bool {
        self.sources.contains(&source)
    }

    /// Fingerprint of what shapes indexed content: the embedding model the
    /// index is actually built with plus chunking and sources. A change
    /// forces a full reindex of an existing store.
    ///
    /// `active` is `None` when no provider came up and chunks are stored
    /// keyword-only.
    pub fn index_fingerprint(&self, active: Option<&EmbeddingIdentity>) -> String {
        let mut sources: Vec<&str> = self.sources.iter().map(|s| s.as_str()).collect();
        sources.sort_unstable();
        let embedding = match active {
            Some(identity) => serde_json::json!({
                "provider": identity.provider,
                "model": identity.model,
                "providerKey": identity.provider_key,
                "dimensions": identity.dimensions,
            }),
            None => serde_json::json!({ "model": FTS_ONLY_MODEL }),
        };
        resolve_config_snapshot_hash(&serde_json::json!({
            "embedding": embedding,
            "chunkTokens": self.chunking.tokens,
            "chunkOverlap": self.chunking.overlap,
            "sources": sources,
        }))
    }
}

/// The embedding model an index is built with, as reported by the live
/// provider rather than the configured one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingIdentity {
    pub provider: String,
    pub model: String,
    pub provider_key: String,
    pub dimensions: usize,
}

/// Resolve the memory search config for `agent_id`.
///
/// Returns `Ok(None)` when memory search is disabled.
pub fn resolve_memory_search_config(
    config: &Config,
    agent_id: &str,
) -> anyhow::Result<Option<ResolvedConfig>> {
    let ms = &config.memory_search;
    if ms.enabled == Some(false) {
        return Ok(None);
    }

    let scope = match ms.scope.unwrap_or_default() {
        MemoryScope::Agent => ResolvedScope::Agent(agent_id.to_string()),
        MemoryScope::All => ResolvedScope::All,
    };

    let agents = match &scope {
        ResolvedScope::Agent(id) => vec![resolve_agent_paths(config, id)],
        ResolvedScope::All => {
            if config.agents.list.is_empty() {
                vec![resolve_agent_paths(config, agent_id)]
            } else {
                config
                    .agents
                    .list
                    .iter()
                    .map(|a| resolve_agent_paths(config, &a.id))
                    .collect()
            }
        }
    };

    let mut sources: Vec<MemorySource> = Vec::new();
    for source in &ms.sources {
        if !sources.contains(source) {
            sources.push(*source);
        }
    }
    if sources.is_empty() {
        sources.push(MemorySource::Memory);
    }

    let local = ms.local.clone().unwrap_or_default();
    let embedding = ResolvedEmbedding {
        provider: ms.provider.unwrap_or_default(),
        fallback: ms.fallback.unwrap_or_default(),
        model: ms
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
        model_path: local.model_path.as_deref().map(expand_home),
        model_cache_dir: local.model_cache_dir.as_deref().map(expand_home),
        dimensions: local.dimensions.unwrap_or(DEFAULT_LOCAL_DIMENSIONS),
        max_input_tokens: local.max_input_tokens.unwrap_or(DEFAULT_MAX_INPUT_TOKENS),
    };

    let chunking_cfg = ms.chunking.clone().unwrap_or_default();
    let tokens = chunking_cfg.tokens.unwrap_or(DEFAULT_CHUNK_TOKENS).max(1) as usize;
    let overlap = (chunking_cfg.overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP) as usize)
        .min(tokens.saturating_sub(1));

    let query_cfg = ms.query.clone().unwrap_or_default();
    let hybrid_cfg = query_cfg.hybrid.clone().unwrap_or_default();
    let mmr_lambda = hybrid_cfg
        .mmr
        .as_ref()
        .filter(|m| m.enabled.unwrap_or(false))
        .map(|m| m.lambda.unwrap_or(DEFAULT_MMR_LAMBDA));
    let half_life_days = hybrid_cfg
        .temporal_decay
        .as_ref()
        .filter(|d| d.enabled.unwrap_or(false))
        .map(|d| d.half_life_days.unwrap_or(DEFAULT_HALF_LIFE_DAYS));
    let query = QueryParams {
        max_results: query_cfg.max_results.unwrap_or(DEFAULT_MAX_RESULTS).max(1) as usize,
        min_score: query_cfg.min_score.unwrap_or(DEFAULT_MIN_SCORE),
        hybrid: HybridParams {
            enabled: hybrid_cfg.enabled.unwrap_or(true),
            vector_weight: hybrid_cfg.vector_weight.unwrap_or(DEFAULT_VECTOR_WEIGHT),
            text_weight: hybrid_cfg.text_weight.unwrap_or(DEFAULT_TEXT_WEIGHT),
            candidate_multiplier: hybrid_cfg
                .candidate_multiplier
                .unwrap_or(DEFAULT_CANDIDATE_MULTIPLIER)
                .max(1) as usize,
            mmr_lambda,
            half_life_days,
        },
        snippet_max_chars: SNIPPET_MAX_CHARS,
    };

    let sync_cfg = ms.sync.clone().unwrap_or_default();
    let sync = SyncPolicy {
        on_session_start: sync_cfg.on_session_start.unwrap_or(true),
        on_search: sync_cfg.on_search.unwrap_or(true),
        watch: sync_cfg.watch.unwrap_or(true),
        watch_debounce: Duration::from_millis(
            sync_cfg
                .watch_debounce_ms
                .unwrap_or(DEFAULT_WATCH_DEBOUNCE_MS)
                .max(MIN_WATCH_DEBOUNCE_MS),
        ),
        interval: sync_cfg
            .interval_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m * 60)),
    };

    let flush_cfg = ms.flush.clone().unwrap_or_default();
    let flush = FlushPolicy {
        on_session_switch: flush_cfg.on_session_switch.unwrap_or(true),
        on_compaction: flush_cfg.on_compaction.unwrap_or(true),
        thresholds: FlushThresholds::normalized(
            Some(flush_cfg.delta_bytes.unwrap_or(DEFAULT_FLUSH_DELTA_BYTES)),
            Some(flush_cfg.delta_messages.unwrap_or(DEFAULT_FLUSH_DELTA_MESSAGES)),
        ),
    };

    let cache_cfg = ms.cache.clone().unwrap_or_default();
    let cache = CacheParams {
        enabled: cache_cfg.enabled.unwrap_or(true),
        max_entries: cache_cfg
            .max_entries
            .filter(|n| *n > 0)
            .map(|n| n as usize),
    };

    let store_cfg = ms.store.clone().unwrap_or_default();
    let store_path = match store_cfg.path.as_deref() {
        Some(raw) if !raw.trim().is_empty() => {
            expand_home(&raw.replace("{agentId}", scope.store_token()))
        }
        _ => config
            .state_dir
            .join("memory")
            .join(format!("{}.sqlite", scope.store_token())),
    };
    let vector_enabled = store_cfg
        .vector
        .as_ref()
        .and_then(|v| v.enabled)
        .unwrap_or(true);

    Ok(Some(ResolvedConfig {
        scope,
        agents,
        sources,
        extra_paths: ms.extra_paths.iter().map(|p| expand_home(p)).collect(),
        store_path,
        vector_enabled,
        embedding,
        chunking: ChunkingParams { tokens, overlap },
        query,
        sync,
        flush,
        cache,
    }))
}

fn resolve_agent_paths(config: &Config, agent_id: &str) -> AgentPaths {
    let entry = config.agents.list.iter().find(|a| a.id == agent_id);

    let workspace_dir = entry
        .and_then(|a| a.workspace.as_deref())
        .map(expand_home)
        .or_else(|| {
            config
                .agents
                .defaults
                .workspace
                .as_deref()
                .map(|root| expand_home(root).join(agent_id))
        })
        .unwrap_or_else(|| config.state_dir.join(format!("workspace-{agent_id}")));

    let sessions_dir = entry
        .and_then(|a| a.sessions_dir.as_deref())
        .map(expand_home)
        .unwrap_or_else(|| {
            config
                .state_dir
                .join("agents")
                .join(agent_id)
                .join("sessions")
        });

    AgentPaths {
        agent_id: agent_id.to_string(),
        workspace_dir,
        sessions_dir,
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_with(value: serde_json::Value) -> Config {
        let mut config: Config = serde_json::from_value(value).unwrap();
        config.state_dir = PathBuf::from("/state");
        config
    }

    #[test]
    fn defaults_resolve_for_single_agent() {
        let config = config_with(serde_json::json!({}));
        let resolved = resolve_memory_search_config(&config, "main")
            .unwrap()
            .unwrap();

        assert_eq!(resolved.key(), "agent:main");
        assert_eq!(resolved.sources, vec![MemorySource::Memory]);
        assert_eq!(resolved.store_path, PathBuf::from("/state/memory/main.sqlite"));
        assert_eq!(
            resolved.agents[0].sessions_dir,
            PathBuf::from("/state/agents/main/sessions")
        );
        assert_eq!(resolved.chunking, ChunkingParams { tokens: 400, overlap: 80 });
        assert_eq!(resolved.query.max_results, 6);
        assert_eq!(
            resolved.flush.thresholds,
            FlushThresholds {
                delta_bytes: 100_000,
                delta_messages: 50
            }
        );
        assert_eq!(resolved.cache.max_entries, None);
    }

    #[test]
    fn repeated_sources_collapse_in_order() {
        let config = config_with(serde_json::json!({
            "memorySearch": { "sources": ["sessions", "memory", "sessions", "memory"] }
        }));
        let resolved = resolve_memory_search_config(&config, "main")
            .unwrap()
            .unwrap();
        assert_eq!(
            resolved.sources,
            vec![MemorySource::Sessions, MemorySource::Memory]
        );
    }

    #[test]
    fn disabled_memory_search_resolves_to_none() {
        let config = config_with(serde_json::json!({ "memorySearch": { "enabled": false } }));
        assert!(resolve_memory_search_config(&config, "main")
            .unwrap()
            .is_none());
    }

    #[test]
    fn all_scope_spans_every_agent() {
        let config = config_with(serde_json::json!({
            "agents": { "list": [
                { "id": "a", "workspace": "/w/a" },
                { "id": "b" }
            ], "defaults": { "workspace": "/ws" } },
            "memorySearch": { "scope": "all", "store": { "path": "/db/{agentId}.sqlite" } }
        }));
        let resolved = resolve_memory_search_config(&config, "a").unwrap().unwrap();

        assert_eq!(resolved.key(), "all-agents");
        assert_eq!(resolved.store_path, PathBuf::from("/db/all-agents.sqlite"));
        assert_eq!(resolved.agents.len(), 2);
        assert_eq!(resolved.agents[0].workspace_dir, PathBuf::from("/w/a"));
        assert_eq!(resolved.agents[1].workspace_dir, PathBuf::from("/ws/b"));
    }

    #[test]
    fn thresholds_normalise_bad_values_to_zero() {
        let t = FlushThresholds::normalized(Some(f64::INFINITY), Some(-4.0));
        assert_eq!(t, FlushThresholds::default());
        assert!(!t.is_enabled());

        let t = FlushThresholds::normalized(Some(f64::NAN), Some(12.9));
        assert_eq!(t.delta_bytes, 0);
        assert_eq!(t.delta_messages, 12);
        assert!(t.is_enabled());
    }

    #[test]
    fn fingerprint_tracks_model_and_chunking() {
        let base = config_with(serde_json::json!({}));
        let a = resolve_memory_search_config(&base, "main").unwrap().unwrap();

        let changed = config_with(serde_json::json!({
            "memorySearch": { "chunking": { "tokens": 200 } }
        }));
        let b = resolve_memory_search_config(&changed, "main").unwrap().unwrap();

        let tuned = config_with(serde_json::json!({
            "memorySearch": { "query": { "maxResults": 10 } }
        }));
        let c = resolve_memory_search_config(&tuned, "main").unwrap().unwrap();

        assert_ne!(a.index_fingerprint(None), b.index_fingerprint(None));
        assert_eq!(a.index_fingerprint(None), c.index_fingerprint(None));
    }

    #[test]
    fn fingerprint_tracks_active_embedding_model() {
        let config = config_with(serde_json::json!({}));
        let resolved = resolve_memory_search_config(&config, "main").unwrap().unwrap();
        let identity = EmbeddingIdentity {
            provider: "local".into(),
            model: DEFAULT_LOCAL_MODEL.into(),
            provider_key: "k1".into(),
            dimensions: 384,
        };
        let rekeyed = EmbeddingIdentity {
            provider_key: "k2".into(),
            ..identity.clone()
        };

        let keyword_only = resolved.index_fingerprint(None);
        let embedded = resolved.index_fingerprint(Some(&identity));
        assert_ne!(keyword_only, embedded);
        assert_ne!(embedded, resolved.index_fingerprint(Some(&rekeyed)));
        assert_eq!(embedded, resolved.index_fingerprint(Some(&identity)));
    }

    #[test]
    fn optional_rerankers_follow_enabled_flags() {
        let config = config_with(serde_json::json!({
            "memorySearch": { "query": { "hybrid": {
                "mmr": { "enabled": true },
                "temporalDecay": { "enabled": false, "halfLifeDays": 7 }
            } } }
        }));
        let resolved = resolve_memory_search_config(&config, "main").unwrap().unwrap();
        assert_eq!(resolved.query.hybrid.mmr_lambda, Some(0.7));
        assert_eq!(resolved.query.hybrid.half_life_days, None);
    }
}
