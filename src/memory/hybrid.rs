use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MemorySource;

use super::store::StoreHit;

/// A candidate chunk carrying its per-channel and merged scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub id: String,
    pub path: String,
    pub agent_id: String,
    pub source: MemorySource,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: String,
    pub vector_score: f64,
    pub text_score: f64,
    pub score: f64,
}

impl ScoredChunk {
    fn from_hit(hit: &StoreHit) -> Self {
        Self {
            id: hit.id.clone(),
            path: hit.path.clone(),
            agent_id: hit.agent_id.clone(),
            source: hit.source,
            start_line: hit.start_line,
            end_line: hit.end_line,
            snippet: hit.snippet.clone(),
            vector_score: 0.0,
            text_score: 0.0,
            score: 0.0,
        }
    }

    fn absorb(&mut self, hit: &StoreHit) {
        if self.snippet.is_empty() && !hit.snippet.is_empty() {
            self.snippet = hit.snippet.clone();
        }
        if self.agent_id.is_empty() && !hit.agent_id.is_empty() {
            self.agent_id = hit.agent_id.clone();
        }
    }
}

/// Union the two channels by chunk id and combine their scores.
///
/// A chunk missing from one channel scores 0 there. Duplicate ids within a
/// channel keep their highest score. The merged score is
/// `vector * vector_weight + text * text_weight`.
pub fn merge_hybrid_results(
    vector: &[StoreHit],
    keyword: &[StoreHit],
    vector_weight: f64,
    text_weight: f64,
) -> Vec<ScoredChunk> {
    let mut merged: Vec<ScoredChunk> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in vector {
        let idx = *index.entry(hit.id.clone()).or_insert_with(|| {
            merged.push(ScoredChunk::from_hit(hit));
            merged.len() - 1
        });
        let entry = &mut merged[idx];
        entry.vector_score = entry.vector_score.max(hit.score);
        entry.absorb(hit);
    }

    for hit in keyword {
        let idx = *index.entry(hit.id.clone()).or_insert_with(|| {
            merged.push(ScoredChunk::from_hit(hit));
            merged.len() - 1
        });
        let entry = &mut merged[idx];
        entry.text_score = entry.text_score.max(hit.score);
        entry.absorb(hit);
    }

    for entry in &mut merged {
        entry.score = entry.vector_score * vector_weight + entry.text_score * text_weight;
    }
    merged
}

/// Keyword-only ranking: the text score is the final score.
pub fn keyword_only(keyword: &[StoreHit]) -> Vec<ScoredChunk> {
    single_channel(keyword, false)
}

/// Vector-only ranking: the similarity is the final score.
pub fn vector_only(vector: &[StoreHit]) -> Vec<ScoredChunk> {
    single_channel(vector, true)
}

fn single_channel(hits: &[StoreHit], is_vector: bool) -> Vec<ScoredChunk> {
    let mut merged = if is_vector {
        merge_hybrid_results(hits, &[], 1.0, 0.0)
    } else {
        merge_hybrid_results(&[], hits, 0.0, 1.0)
    };
    for entry in &mut merged {
        entry.score = if is_vector {
            entry.vector_score
        } else {
            entry.text_score
        };
    }
    merged
}

/// Stable descending sort by merged score.
pub fn sort_by_score(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

// ---------------------------------------------------------------------------
// Temporal decay
// ---------------------------------------------------------------------------

static DATED_MEMORY_PATH: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:^|/)memory/(\d{4})-(\d{2})-(\d{2})\.md$").ok());

/// How a result's age is determined for decay purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBasis {
    /// `memory/YYYY-MM-DD.md`: the date in the filename.
    Dated(NaiveDate),
    /// `MEMORY.md` and undated files under `memory/`: never decays.
    Evergreen,
    /// Everything else: the file's modification time.
    Modified,
}

pub fn age_basis(path: &str, source: MemorySource) -> AgeBasis {
    if source == MemorySource::Memory {
        if let Some(date) = date_from_memory_path(path) {
            return AgeBasis::Dated(date);
        }
        let normalized = path.replace('\\', "/");
        if normalized == "MEMORY.md"
            || normalized == "memory.md"
            || normalized.starts_with("memory/")
        {
            return AgeBasis::Evergreen;
        }
    }
    AgeBasis::Modified
}

pub fn date_from_memory_path(path: &str) -> Option<NaiveDate> {
    let normalized = path.replace('\\', "/");
    let caps = DATED_MEMORY_PATH.as_ref()?.captures(&normalized)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// `exp(-ln 2 / half_life * age)`; 1.0 for non-positive ages or a
/// degenerate half-life.
pub fn decay_multiplier(age_days: f64, half_life_days: f64) -> f64 {
    if !half_life_days.is_finite() || half_life_days <= 0.0 || !age_days.is_finite() {
        return 1.0;
    }
    let lambda = std::f64::consts::LN_2 / half_life_days;
    (-lambda * age_days.max(0.0)).exp()
}

/// Scale each score by its decay multiplier. `age_days` returns `None` for
/// results that must not decay.
pub fn apply_temporal_decay<F>(results: &mut [ScoredChunk], half_life_days: f64, mut age_days: F)
where
    F: FnMut(&ScoredChunk) -> Option<f64>,
{
    for entry in results.iter_mut() {
        if let Some(age) = age_days(entry) {
            entry.score *= decay_multiplier(age, half_life_days);
        }
    }
}

// ---------------------------------------------------------------------------
// MMR
// ---------------------------------------------------------------------------

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = (a.len() + b.len()) as f64 - intersection;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Maximal marginal relevance re-ranking over snippet token overlap.
///
/// Input should already be sorted by score. Relevance is the score scaled
/// by the top score so that `lambda` trades off comparable quantities.
pub fn mmr_rerank(results: Vec<ScoredChunk>, lambda: f64) -> Vec<ScoredChunk> {
    if results.len() <= 1 {
        return results;
    }
    let lambda = lambda.clamp(0.0, 1.0);
    let max_score = results
        .iter()
        .map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let scale = if max_score > 0.0 { max_score } else { 1.0 };

    let tokens: Vec<HashSet<String>> = results.iter().map(|r| token_set(&r.snippet)).collect();
    let mut remaining: Vec<usize> = (0..results.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(results.len());

    while !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (pos, &candidate) in remaining.iter().enumerate() {
            let relevance = results[candidate].score / scale;
            let redundancy = selected
                .iter()
                .map(|&s| jaccard(&tokens[candidate], &tokens[s]))
                .fold(0.0, f64::max);
            let value = lambda * relevance - (1.0 - lambda) * redundancy;
            if value > best_value {
                best_value = value;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<ScoredChunk>> = results.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hit(id: &str, score: f64, snippet: &str) -> StoreHit {
        StoreHit {
            id: id.into(),
            path: format!("memory/{id}.md"),
            agent_id: "main".into(),
            source: MemorySource::Memory,
            start_line: 1,
            end_line: 1,
            snippet: snippet.into(),
            score,
        }
    }

    fn scored(id: &str, score: f64, snippet: &str) -> ScoredChunk {
        let mut s = ScoredChunk::from_hit(&hit(id, score, snippet));
        s.score = score;
        s
    }

    #[test]
    fn vector_only_hit_uses_vector_weight() {
        let merged = merge_hybrid_results(&[hit("a", 0.9, "x")], &[], 0.7, 0.3);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].score - 0.63).abs() < 1e-9);
        assert_eq!(merged[0].text_score, 0.0);
    }

    #[test]
    fn union_keeps_max_per_channel() {
        let merged = merge_hybrid_results(
            &[hit("a", 0.5, "x"), hit("a", 0.8, "x")],
            &[hit("a", 0.4, "x"), hit("b", 1.0, "y")],
            0.7,
            0.3,
        );
        assert_eq!(merged.len(), 2);
        assert!((merged[0].score - (0.8 * 0.7 + 0.4 * 0.3)).abs() < 1e-9);
        assert!((merged[1].score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn empty_snippet_is_filled_from_other_channel() {
        let mut empty = hit("a", 0.5, "");
        empty.agent_id = String::new();
        let merged = merge_hybrid_results(&[empty], &[hit("a", 0.2, "text")], 0.5, 0.5);
        assert_eq!(merged[0].snippet, "text");
        assert_eq!(merged[0].agent_id, "main");
    }

    #[test]
    fn keyword_only_keeps_raw_scores() {
        let results = keyword_only(&[hit("a", 0.42, "x")]);
        assert_eq!(results[0].score, 0.42);
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let mut results = vec![scored("a", 0.5, ""), scored("b", 0.9, ""), scored("c", 0.5, "")];
        sort_by_score(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn dated_and_evergreen_paths() {
        assert_eq!(
            age_basis("memory/2026-03-01.md", MemorySource::Memory),
            AgeBasis::Dated(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap())
        );
        assert_eq!(age_basis("MEMORY.md", MemorySource::Memory), AgeBasis::Evergreen);
        assert_eq!(
            age_basis("memory/projects/x.md", MemorySource::Memory),
            AgeBasis::Evergreen
        );
        assert_eq!(
            age_basis("memory/2026-13-40.md", MemorySource::Memory),
            AgeBasis::Evergreen
        );
        assert_eq!(
            age_basis("sessions/a.jsonl", MemorySource::Sessions),
            AgeBasis::Modified
        );
    }

    #[test]
    fn decay_halves_at_half_life() {
        assert!((decay_multiplier(30.0, 30.0) - 0.5).abs() < 1e-12);
        assert_eq!(decay_multiplier(-5.0, 30.0), 1.0);
        assert_eq!(decay_multiplier(10.0, 0.0), 1.0);

        let mut results = vec![scored("a", 1.0, ""), scored("b", 1.0, "")];
        apply_temporal_decay(&mut results, 10.0, |r| (r.id == "a").then_some(20.0));
        assert!((results[0].score - 0.25).abs() < 1e-12);
        assert_eq!(results[1].score, 1.0);
    }

    #[test]
    fn mmr_demotes_near_duplicates() {
        let results = vec![
            scored("a", 1.0, "deploy checklist for the api"),
            scored("b", 0.95, "deploy checklist for the api"),
            scored("c", 0.9, "rotate the database credentials"),
        ];
        let reranked = mmr_rerank(results, 0.7);
        let ids: Vec<&str> = reranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn mmr_with_lambda_one_keeps_order() {
        let results = vec![scored("a", 1.0, "same"), scored("b", 0.5, "same")];
        let ids: Vec<String> = mmr_rerank(results, 1.0).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
