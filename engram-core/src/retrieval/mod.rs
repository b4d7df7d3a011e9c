//! Hybrid BM25 + vector retrieval over chunks, and the episode-retrieval
//! variant used by agent-initiated recall (spec §4.7).

pub mod ranking;

use crate::constants::retrieval as consts;
use crate::embeddings::cosine_similarity;
use crate::error::Result;
use crate::store::{queries, Store};
use crate::types::SearchResult;
use ranking::{
    mmr_rerank, normalize_bm25_scores, normalize_fts_query, normalized_bm25_for_episode_pool,
    temporal_decay, MmrCandidate,
};
use std::collections::HashSet;

/// Runs the hybrid chunk-search pipeline (spec §4.7).
pub struct Retriever<'a> {
    store: &'a Store,
}

impl<'a> Retriever<'a> {
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Retriever { store }
    }

    /// `search(queryEmbedding, queryText, limit, project?) -> [SearchResult]`.
    ///
    /// `project` restricts results to that project's family plus global
    /// (null-project) chunks. There is no project-hierarchy registry in this
    /// schema, so "family" is the project itself, not its descendants — see
    /// the corresponding Open Question decision.
    pub async fn search(
        &self,
        query_embedding: Option<&[f32]>,
        query_text: &str,
        limit: usize,
        project: Option<&str>,
        now_ms: i64,
    ) -> Result<Vec<SearchResult>> {
        let candidate_count = limit * 3;
        let conn = self.store.connection();

        let normalized = normalize_fts_query(query_text, consts::MAX_QUERY_TERMS);

        let bm25_hits = if normalized.is_empty() {
            Vec::new()
        } else {
            queries::bm25_search_chunks(conn, &normalized, candidate_count).await?
        };

        if bm25_hits.is_empty() {
            return self
                .vector_fallback(query_embedding, candidate_count, limit, project, now_ms)
                .await;
        }

        let rowids: Vec<i64> = bm25_hits.iter().map(|h| h.rowid).collect();
        let fetched = queries::fetch_chunks_by_rowid(conn, &rowids).await?;
        let scores_by_rowid: std::collections::HashMap<i64, f64> =
            bm25_hits.iter().map(|h| (h.rowid, h.score)).collect();

        let mut kept: Vec<(f64, crate::types::Chunk)> = Vec::new();
        for (rowid, chunk) in fetched {
            if !project_family_matches(project, chunk.project.as_deref()) {
                continue;
            }
            if let Some(&score) = scores_by_rowid.get(&rowid) {
                kept.push((score, chunk));
            }
        }

        let raw_scores: Vec<f64> = kept.iter().map(|(s, _)| *s).collect();
        let normalized_scores = normalize_bm25_scores(&raw_scores);

        let mut scored: Vec<MmrCandidate<SearchResult>> = Vec::with_capacity(kept.len());
        for ((_, chunk), norm_bm25) in kept.into_iter().zip(normalized_scores) {
            let vector_score = match (query_embedding, chunk.embedding.as_deref()) {
                (Some(q), Some(e)) => f64::from(cosine_similarity(q, e)),
                _ => 0.0,
            };
            let raw = f64::from(consts::VECTOR_WEIGHT) * vector_score
                + f64::from(consts::BM25_WEIGHT) * norm_bm25;
            let age_days = ((now_ms - chunk.updated_at) as f64) / 86_400_000.0;
            let decay = temporal_decay(&chunk.path, age_days, consts::DECAY_HALF_LIFE_DAYS);
            let final_score = raw * decay;
            scored.push(MmrCandidate {
                text: chunk.text.clone(),
                relevance: final_score as f32,
                item: SearchResult {
                    id: chunk.id,
                    path: chunk.path,
                    layer: chunk.layer,
                    project: chunk.project,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    text: chunk.text,
                    final_score,
                },
            });
        }
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        Ok(mmr_rerank(scored, limit, consts::MMR_LAMBDA))
    }

    async fn vector_fallback(
        &self,
        query_embedding: Option<&[f32]>,
        candidate_count: usize,
        limit: usize,
        project: Option<&str>,
        now_ms: i64,
    ) -> Result<Vec<SearchResult>> {
        let conn = self.store.connection();
        let recent = queries::recent_chunks_with_embedding(conn, candidate_count).await?;

        let mut scored = Vec::new();
        for chunk in recent {
            if !project_family_matches(project, chunk.project.as_deref()) {
                continue;
            }
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            let vector_score = match query_embedding {
                Some(q) => f64::from(cosine_similarity(q, embedding)),
                None => 0.0,
            };
            let age_days = ((now_ms - chunk.updated_at) as f64) / 86_400_000.0;
            let decay = temporal_decay(&chunk.path, age_days, consts::DECAY_HALF_LIFE_DAYS);
            let final_score = vector_score * decay;
            scored.push(MmrCandidate {
                text: chunk.text.clone(),
                relevance: final_score as f32,
                item: SearchResult {
                    id: chunk.id,
                    path: chunk.path,
                    layer: chunk.layer,
                    project: chunk.project,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    text: chunk.text,
                    final_score,
                },
            });
        }
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        Ok(mmr_rerank(scored, limit, consts::MMR_LAMBDA))
    }
}

/// `true` if `chunk_project` belongs to the searched family: an exact match,
/// or a null (global) chunk, which is visible from every project.
fn project_family_matches(searched: Option<&str>, chunk_project: Option<&str>) -> bool {
    match (searched, chunk_project) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(s), Some(c)) => s == c,
    }
}

/// Builds the episode candidate pool shared by the §4.7.2 relevance blend
/// and the §4.8 Recollector's RRF fusion: BM25 hits over `episodes_fts`
/// unioned with the recently-accessed pool, each row with its embedding
/// already attached. Exposed so the Recollector can reuse the exact same
/// pool without re-querying.
pub async fn episode_candidate_pool(
    store: &Store,
    query_text: &str,
    max_bm25_hits: usize,
    recent_pool_size: usize,
) -> Result<(Vec<queries::Bm25Hit>, Vec<(i64, crate::types::Episode)>)> {
    let conn = store.connection();
    let normalized = normalize_fts_query(query_text, consts::MAX_QUERY_TERMS);

    let bm25_hits = if normalized.is_empty() {
        Vec::new()
    } else {
        queries::bm25_search_episodes(conn, &normalized, max_bm25_hits).await?
    };

    let recent_pool = queries::recent_accessed_episodes(conn, recent_pool_size).await?;
    let seen_rowids: HashSet<i64> = recent_pool.iter().map(|(r, _)| *r).collect();
    let missing_rowids: Vec<i64> = bm25_hits
        .iter()
        .map(|h| h.rowid)
        .filter(|r| !seen_rowids.contains(r))
        .collect();
    let fetched_missing = queries::fetch_episodes_by_rowid(conn, &missing_rowids).await?;

    let pool: Vec<(i64, crate::types::Episode)> =
        recent_pool.into_iter().chain(fetched_missing).collect();
    Ok((bm25_hits, pool))
}

/// Runs the episode-retrieval variant for agent-initiated recall (spec
/// §4.7.2): relevance = 0.7·vector + 0.3·normalizedBM25, importance floor,
/// 30-day recency decay, Laplace-smoothed access frequency, simple
/// sort-and-take (no rank fusion — that's the Recollector's §4.8 pipeline).
pub async fn search_episodes(
    store: &Store,
    query_embedding: Option<&[f32]>,
    query_text: &str,
    limit: usize,
    now_ms: i64,
) -> Result<Vec<SearchResult>> {
    let (bm25_hits, pool) =
        episode_candidate_pool(store, query_text, consts::MAX_BM25_HITS, consts::RECENT_EPISODE_POOL_SIZE)
            .await?;

    if pool.is_empty() {
        return Ok(Vec::new());
    }

    let bm25_scores: Vec<f64> = bm25_hits.iter().map(|h| h.score).collect();
    let bm25_norm_by_idx = normalized_bm25_for_episode_pool(&bm25_scores);
    let bm25_norm_by_rowid: std::collections::HashMap<i64, f64> = bm25_hits
        .iter()
        .enumerate()
        .filter_map(|(i, h)| bm25_norm_by_idx.get(&i).map(|&n| (h.rowid, n)))
        .collect();

    let max_access = pool.iter().map(|(_, e)| e.access_count).max().unwrap_or(0);

    let mut scored: Vec<(i64, crate::types::Episode, f64)> = Vec::with_capacity(pool.len());
    for (rowid, episode) in pool {
        let vector = match (query_embedding, episode.embedding.as_deref()) {
            (Some(q), Some(e)) => cosine_similarity(q, e),
            _ => 0.0,
        };
        let normalized_bm25 = bm25_norm_by_rowid.get(&rowid).copied().unwrap_or(0.0);
        let relevance =
            f64::from(consts::VECTOR_WEIGHT) * f64::from(vector) + f64::from(consts::BM25_WEIGHT) * normalized_bm25;
        let effective_relevance = if episode.importance == crate::types::Importance::High {
            relevance.max(f64::from(consts::HIGH_IMPORTANCE_RELEVANCE_FLOOR))
        } else {
            relevance
        };
        let age_days = ((now_ms - episode.created_at) as f64) / 86_400_000.0;
        let recency = (-(std::f64::consts::LN_2 / consts::DECAY_HALF_LIFE_DAYS) * age_days).exp();
        let access_freq = (episode.access_count as f64 + 1.0) / (max_access as f64 + 1.0);
        let final_score = 0.5 * effective_relevance + 0.3 * recency + 0.2 * access_freq;
        scored.push((rowid, episode, final_score));
    }
    scored.sort_by(|a, b| b.2.total_cmp(&a.2));

    let conn = store.connection();
    let mut out = Vec::with_capacity(limit);
    for (_, episode, final_score) in scored.into_iter().take(limit) {
        queries::touch_accessed_at(conn, &episode.id, now_ms).await?;
        out.push(SearchResult {
            id: episode.id,
            path: String::new(),
            layer: episode.scope,
            project: episode.project,
            start_line: 0,
            end_line: 0,
            text: episode.summary,
            final_score,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_match_allows_exact_and_null_project() {
        assert!(project_family_matches(Some("proj-a"), Some("proj-a")));
        assert!(project_family_matches(Some("proj-a"), None));
        assert!(!project_family_matches(Some("proj-a"), Some("proj-b")));
        assert!(project_family_matches(None, Some("anything")));
    }
}
