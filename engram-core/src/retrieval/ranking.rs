//! Query normalization, temporal decay, and MMR diversity reranking shared
//! by the chunk and episode retrieval pipelines (spec §4.7).

use std::collections::{HashMap, HashSet};

const RESERVED_TOKENS: &[&str] = &["AND", "OR", "NOT", "NEAR"];

/// Lowercases, strips non-alphanumerics, drops FTS-reserved tokens, and
/// joins the remainder with `" OR "`. Returns an empty string if nothing
/// survives, which callers treat as "skip the lexical candidate set".
#[must_use]
pub fn normalize_fts_query(query: &str, max_terms: usize) -> String {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .filter(|w| !RESERVED_TOKENS.contains(&w.to_uppercase().as_str()))
        .take(max_terms)
        .collect();
    terms.join(" OR ")
}

/// Min-max normalizes BM25 scores (more negative = better match) into
/// `[0, 1]` where `1.0` is the best score. If every score is equal, every
/// candidate gets `1.0` (spec §4.7 step 5).
#[must_use]
pub fn normalize_bm25_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; scores.len()];
    }
    // Most negative (== min) is best, so it maps to 1.0.
    scores.iter().map(|&s| (max - s) / (max - min)).collect()
}

/// A single-hit BM25 pool gets `0.5` rather than `1.0`, per the episode
/// variant's anti-inflation rule (spec §4.7.2).
#[must_use]
pub fn normalized_bm25_for_episode_pool(scores: &[f64]) -> HashMap<usize, f64> {
    if scores.len() == 1 {
        let mut out = HashMap::new();
        out.insert(0, 0.5);
        return out;
    }
    normalize_bm25_scores(scores)
        .into_iter()
        .enumerate()
        .collect()
}

/// `true` if `path`'s basename ends in `MEMORY.md` or does not begin with a
/// `YYYY-MM-DD` date prefix — such paths decay to a flat `1.0` (spec §4.7
/// step 6 "evergreen").
#[must_use]
pub fn is_evergreen(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    if basename.ends_with("MEMORY.md") {
        return true;
    }
    !starts_with_iso_date(basename)
}

fn starts_with_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 10 {
        return false;
    }
    let pattern_ok = bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && bytes[4] == b'-'
        && bytes[5].is_ascii_digit()
        && bytes[6].is_ascii_digit()
        && bytes[7] == b'-'
        && bytes[8].is_ascii_digit()
        && bytes[9].is_ascii_digit();
    pattern_ok
}

/// `exp(-(ln2/half_life_days) * age_days)`, or `1.0` for an evergreen path.
#[must_use]
pub fn temporal_decay(path: &str, age_days: f64, half_life_days: f64) -> f64 {
    if is_evergreen(path) {
        return 1.0;
    }
    (-(std::f64::consts::LN_2 / half_life_days) * age_days).exp()
}

/// Lowercased, non-word-split tokens, memoized per call via the supplied
/// cache map (spec §4.7.1 "a per-call token cache prevents repeated
/// tokenization").
fn tokenize<'a>(text: &str, cache: &'a mut HashMap<String, HashSet<String>>) -> &'a HashSet<String> {
    cache.entry(text.to_string()).or_insert_with(|| {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    })
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

/// One scored candidate going into MMR reranking.
pub struct MmrCandidate<T> {
    pub item: T,
    pub text: String,
    pub relevance: f32,
}

/// Greedy MMR selection down to `limit` items (spec §4.7.1). `candidates`
/// MUST already be sorted by relevance descending; this only reorders for
/// diversity, it never adds items back in after score-based truncation.
pub fn mmr_rerank<T>(candidates: Vec<MmrCandidate<T>>, limit: usize, lambda: f32) -> Vec<T> {
    let mut pool = candidates;
    let mut token_cache: HashMap<String, HashSet<String>> = HashMap::new();
    let mut selected_idx: Vec<usize> = Vec::new();

    while selected_idx.len() < limit && selected_idx.len() < pool.len() {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in pool.iter().enumerate() {
            if selected_idx.contains(&i) {
                continue;
            }
            let candidate_tokens = tokenize(&candidate.text, &mut token_cache).clone();
            let max_sim = selected_idx
                .iter()
                .map(|&j| jaccard(&candidate_tokens, tokenize(&pool[j].text, &mut token_cache)))
                .fold(0.0_f32, f32::max);
            let mmr = lambda * candidate.relevance - (1.0 - lambda) * max_sim;
            if best.is_none_or(|(_, b)| mmr > b) {
                best = Some((i, mmr));
            }
        }
        match best {
            Some((i, _)) => selected_idx.push(i),
            None => break,
        }
    }

    let mut out = Vec::with_capacity(selected_idx.len());
    // Pull items out of `pool` by index without requiring `T: Clone`.
    let mut slots: Vec<Option<T>> = pool.drain(..).map(|c| Some(c.item)).collect();
    for i in selected_idx {
        if let Some(item) = slots[i].take() {
            out.push(item);
        }
    }
    out
}

/// Dense 1-based ranking (ties share rank), used to build the four rank
/// lists that feed reciprocal rank fusion (spec §4.8 step 7).
#[must_use]
pub fn dense_rank(sorted_scores: &[f64]) -> Vec<u32> {
    let mut ranks = Vec::with_capacity(sorted_scores.len());
    let mut rank = 0u32;
    let mut last: Option<f64> = None;
    for &score in sorted_scores {
        if last != Some(score) {
            rank += 1;
            last = Some(score);
        }
        ranks.push(rank);
    }
    ranks
}

/// Reciprocal rank fusion term: `weight / (k + rank)`, or `0.0` if `rank`
/// is `None` (absent from that rank list contributes nothing, not the
/// worst possible rank — spec §4.8 step 8).
#[must_use]
pub fn rrf_term(rank: Option<u32>, weight: f64, k: f64) -> f64 {
    match rank {
        Some(r) => weight / (k + f64::from(r)),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_drops_reserved_tokens() {
        assert_eq!(
            normalize_fts_query("Hello, AND world! NOT foo", 20),
            "hello OR world OR foo"
        );
    }

    #[test]
    fn empty_query_normalizes_to_empty_string() {
        assert_eq!(normalize_fts_query("!!! ...", 20), "");
    }

    #[test]
    fn equal_bm25_scores_all_map_to_one() {
        assert_eq!(normalize_bm25_scores(&[-5.0, -5.0, -5.0]), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn most_negative_bm25_score_maps_to_one() {
        let out = normalize_bm25_scores(&[-10.0, -1.0]);
        assert!((out[0] - 1.0).abs() < 1e-9);
        assert!((out[1] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn dated_basename_is_not_evergreen() {
        assert!(!is_evergreen("2026-01-01-notes.md"));
        assert!(is_evergreen("MEMORY.md"));
        assert!(is_evergreen("notes-about-rust.md"));
    }

    #[test]
    fn zero_age_decay_is_one() {
        assert!((temporal_decay("2026-01-01-notes.md", 0.0, 30.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn jaccard_empty_pairs() {
        let mut cache = HashMap::new();
        let empty = tokenize("", &mut cache).clone();
        let non_empty = tokenize("hello world", &mut cache).clone();
        assert_eq!(jaccard(&empty, &empty), 1.0);
        assert_eq!(jaccard(&empty, &non_empty), 0.0);
    }

    #[test]
    fn dense_rank_shares_ties() {
        assert_eq!(dense_rank(&[-10.0, -10.0, -3.0]), vec![1, 1, 2]);
    }
}
