use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{MemorySource, QueryParams, MAX_CANDIDATES};

use super::embeddings::{embed_query, EmbeddingProvider};
use super::error::MemoryResult;
use super::hybrid::{self, AgeBasis, ScoredChunk};
use super::store::MemoryStore;

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// A single search result returned by the memory subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchResult {
    /// Source file path (relative to the workspace where possible).
    pub path: String,
    pub agent_id: String,
    pub source: MemorySource,
    /// First line number of the matched region (1-based, inclusive).
    pub start_line: u32,
    /// Last line number of the matched region (1-based, inclusive).
    pub end_line: u32,
    pub score: f64,
    /// The matched text, truncated for display.
    pub snippet: String,
}

impl From<ScoredChunk> for MemorySearchResult {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            path: chunk.path,
            agent_id: chunk.agent_id,
            source: chunk.source,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            score: chunk.score,
            snippet: chunk.snippet,
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call overrides; unset fields fall back to the configured values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Restrict results to one agent (useful for shared indexes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub mode: SearchMode,
}

/// The strategy used to execute a memory search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Keyword (BM25) search only.
    Fts,
    /// Vector similarity search only.
    Vector,
    /// Weighted merge of both channels.
    #[default]
    Hybrid,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Candidates fetched per channel.
pub fn candidate_limit(max_results: usize, multiplier: usize) -> usize {
    max_results
        .saturating_mul(multiplier)
        .clamp(1, MAX_CANDIDATES)
}

/// Run a search against `store`.
///
/// Without a provider (or in `Fts` mode) results carry raw keyword scores.
/// A failing query embedding degrades to keyword-only instead of failing
/// the search.
pub async fn hybrid_search(
    store: &MemoryStore,
    provider: Option<&dyn EmbeddingProvider>,
    params: &QueryParams,
    query: &str,
    options: &MemorySearchOptions,
) -> MemoryResult<Vec<MemorySearchResult>> {
    let cleaned = query.trim();
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let max_results = options.max_results.unwrap_or(params.max_results).max(1);
    let min_score = options.min_score.unwrap_or(params.min_score);
    let candidates = candidate_limit(max_results, params.hybrid.candidate_multiplier);

    let mut mode = options.mode;
    if mode == SearchMode::Hybrid && !params.hybrid.enabled {
        mode = SearchMode::Vector;
    }
    if provider.is_none() {
        mode = SearchMode::Fts;
    }

    let query_vector = match (mode, provider) {
        (SearchMode::Fts, _) | (_, None) => None,
        (_, Some(provider)) => match embed_query(provider, cleaned).await {
            Ok(v) if v.iter().any(|x| *x != 0.0) => Some((v, provider.model_name())),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to keyword search");
                mode = SearchMode::Fts;
                None
            }
        },
    };

    let keyword = if mode == SearchMode::Vector {
        Vec::new()
    } else {
        store.query_full_text(cleaned, candidates, min_score)?
    };
    let vector = match &query_vector {
        Some((embedding, model)) => store.query_vector(embedding, candidates, model)?,
        None => Vec::new(),
    };

    let mut merged = match mode {
        SearchMode::Fts => hybrid::keyword_only(&keyword),
        SearchMode::Vector => hybrid::vector_only(&vector),
        SearchMode::Hybrid => hybrid::merge_hybrid_results(
            &vector,
            &keyword,
            params.hybrid.vector_weight,
            params.hybrid.text_weight,
        ),
    };

    if let Some(agent) = options.agent_id.as_deref() {
        merged.retain(|r| r.agent_id == agent);
    }

    if let Some(half_life) = params.hybrid.half_life_days {
        let now_ms = Utc::now().timestamp_millis();
        let today = Utc::now().date_naive();
        hybrid::apply_temporal_decay(&mut merged, half_life, |r| {
            age_in_days(store, r, today, now_ms)
        });
    }

    hybrid::sort_by_score(&mut merged);
    if let Some(lambda) = params.hybrid.mmr_lambda {
        merged = hybrid::mmr_rerank(merged, lambda);
    }

    let results: Vec<MemorySearchResult> = merged
        .into_iter()
        .filter(|r| r.score >= min_score)
        .take(max_results)
        .map(MemorySearchResult::from)
        .collect();

    debug!(
        query = cleaned,
        mode = ?mode,
        keyword = keyword.len(),
        vector = vector.len(),
        results = results.len(),
        "memory search"
    );
    Ok(results)
}

fn age_in_days(store: &MemoryStore, chunk: &ScoredChunk, today: NaiveDate, now_ms: i64) -> Option<f64> {
    match hybrid::age_basis(&chunk.path, chunk.source) {
        AgeBasis::Evergreen => None,
        AgeBasis::Dated(date) => Some((today - date).num_days() as f64),
        AgeBasis::Modified => {
            let file = store.get_file(&chunk.path, &chunk.agent_id).ok().flatten()?;
            Some((now_ms - file.mtime_ms) as f64 / 86_400_000.0)
        }
    }
}
