/// Default configuration constants used across the memory subsystem.

/// Default embedding chunk size in tokens.
pub const DEFAULT_CHUNK_TOKENS: u32 = 400;

/// Default embedding chunk overlap.
pub const DEFAULT_CHUNK_OVERLAP: u32 = 80;

/// Default maximum number of search results.
pub const DEFAULT_MAX_RESULTS: u32 = 6;

/// Default minimum merged score.
pub const DEFAULT_MIN_SCORE: f64 = 0.35;

/// Default hybrid weight for the vector channel.
pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.7;

/// Default hybrid weight for the keyword channel.
pub const DEFAULT_TEXT_WEIGHT: f64 = 0.3;

/// Default candidate multiplier applied to `maxResults` per channel.
pub const DEFAULT_CANDIDATE_MULTIPLIER: u32 = 4;

/// Hard cap on candidates fetched from a single channel.
pub const MAX_CANDIDATES: usize = 200;

/// Default MMR trade-off between relevance and diversity.
pub const DEFAULT_MMR_LAMBDA: f64 = 0.7;

/// Default temporal decay half-life.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Default session delta thresholds.
pub const DEFAULT_FLUSH_DELTA_BYTES: f64 = 100_000.0;
pub const DEFAULT_FLUSH_DELTA_MESSAGES: f64 = 50.0;

/// Default watch debounce (1.5 seconds).
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 1500;

/// Lower bound for the watch debounce.
pub const MIN_WATCH_DEBOUNCE_MS: u64 = 100;

/// Interval on which the worker host samples its dirty flag.
pub const DIRTY_POLL_INTERVAL_MS: u64 = 250;

/// Default snippet length in characters.
pub const SNIPPET_MAX_CHARS: usize = 700;

/// Default local embedding model.
pub const DEFAULT_LOCAL_MODEL: &str = "local-hash-v1";

/// Default local embedding dimensionality.
pub const DEFAULT_LOCAL_DIMENSIONS: usize = 384;

/// Default maximum input tokens accepted by an embedding provider.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 8192;

/// Default embedding batch max tokens.
pub const EMBEDDING_BATCH_MAX_TOKENS: usize = 8000;

/// Model tag stored on chunks indexed without an embedding provider.
pub const FTS_ONLY_MODEL: &str = "fts-only";

/// Scope key used when one manager spans all agents.
pub const ALL_AGENTS_KEY: &str = "all-agents";

/// Agent id used when no agents are configured.
pub const DEFAULT_AGENT_ID: &str = "main";
