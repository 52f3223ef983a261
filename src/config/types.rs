use serde::{Deserialize, Serialize};

// ============================================================================
// Agents Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaultsConfig {
    /// Root under which per-agent workspaces live when an agent does not set
    /// its own `workspace`.
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    pub workspace: Option<String>,
    pub sessions_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaultsConfig,
    #[serde(default)]
    pub list: Vec<AgentConfig>,
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: Option<bool>,
}

// ============================================================================
// Memory Search Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    #[default]
    Memory,
    Sessions,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Memory => "memory",
            MemorySource::Sessions => "sessions",
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "sessions" => Ok(Self::Sessions),
            _ => Err(format!("invalid memory source: {s}")),
        }
    }
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// One index per agent.
    #[default]
    Agent,
    /// One shared index spanning every configured agent.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Local,
    Disabled,
}

/// What to do when the embedding provider cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingFallback {
    /// Keep serving keyword-only search.
    #[default]
    #[serde(rename = "fts-only")]
    KeywordOnly,
    /// Treat provider failure as fatal for the manager.
    #[serde(rename = "none")]
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchConfig {
    pub enabled: Option<bool>,
    pub scope: Option<MemoryScope>,
    #[serde(default)]
    pub sources: Vec<MemorySource>,
    #[serde(default)]
    pub extra_paths: Vec<String>,
    pub provider: Option<EmbeddingProvider>,
    pub fallback: Option<EmbeddingFallback>,
    pub model: Option<String>,
    pub local: Option<MemorySearchLocalConfig>,
    pub store: Option<MemorySearchStoreConfig>,
    pub chunking: Option<MemorySearchChunkingConfig>,
    pub sync: Option<MemorySearchSyncConfig>,
    pub flush: Option<MemorySearchFlushConfig>,
    pub query: Option<MemorySearchQueryConfig>,
    pub cache: Option<MemorySearchCacheConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchLocalConfig {
    pub model_path: Option<String>,
    pub model_cache_dir: Option<String>,
    pub dimensions: Option<usize>,
    pub max_input_tokens: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchStoreConfig {
    /// Database path; `{agentId}` is replaced with the manager's scope key.
    pub path: Option<String>,
    pub vector: Option<MemorySearchVectorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchVectorConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchChunkingConfig {
    pub tokens: Option<u32>,
    pub overlap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchSyncConfig {
    pub on_session_start: Option<bool>,
    pub on_search: Option<bool>,
    pub watch: Option<bool>,
    pub watch_debounce_ms: Option<u64>,
    pub interval_minutes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchFlushConfig {
    pub on_session_switch: Option<bool>,
    pub on_compaction: Option<bool>,
    /// Kept as floats so that non-finite or negative values can be
    /// normalised instead of rejected.
    pub delta_bytes: Option<f64>,
    pub delta_messages: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchQueryConfig {
    pub max_results: Option<u32>,
    pub min_score: Option<f64>,
    pub hybrid: Option<MemorySearchHybridConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchHybridConfig {
    pub enabled: Option<bool>,
    pub vector_weight: Option<f64>,
    pub text_weight: Option<f64>,
    pub candidate_multiplier: Option<u32>,
    pub mmr: Option<MemorySearchMmrConfig>,
    pub temporal_decay: Option<MemorySearchTemporalDecayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchMmrConfig {
    pub enabled: Option<bool>,
    pub lambda: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchTemporalDecayConfig {
    pub enabled: Option<bool>,
    pub half_life_days: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchCacheConfig {
    pub enabled: Option<bool>,
    pub max_entries: Option<i64>,
}
