//! Pre-computed per-session recollection bites (spec §4.8). Triggered when
//! the tailer observes a new, caught-up-to-live-tail user message.

use crate::constants::retrieval as consts;
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::{EngramError, Result};
use crate::retrieval::ranking::{dense_rank, rrf_term};
use crate::retrieval::episode_candidate_pool;
use crate::store::{queries, Store};
use crate::types::{Bite, Importance, RecollectionFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_MESSAGE_CHARS: usize = 6000;

/// Runs the recollection pipeline and writes the per-session file.
pub struct Recollector {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    topic_threshold: f32,
}

impl Recollector {
    #[must_use]
    pub fn new(store: Arc<Store>, embedder: Arc<dyn EmbeddingProvider>, topic_threshold: f32) -> Self {
        Recollector {
            store,
            embedder,
            topic_threshold,
        }
    }

    /// Runs one recollection for `session_id`/`message`, writing the result
    /// to `out_path` (tmp + rename). `previous_embedding` is the session's
    /// last-recollected-message embedding, used for the topic gate; `force`
    /// bypasses the gate (spec §4.8 step 2, invoked with `force=true` after
    /// a successful extraction).
    pub async fn run(
        &self,
        session_id: &str,
        message: &str,
        message_uuid: &str,
        timestamp: i64,
        previous_embedding: Option<&[f32]>,
        force: bool,
        out_path: &Path,
    ) -> Result<Option<Vec<f32>>> {
        let truncated: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        let embedded = self
            .embedder
            .embed(&[truncated.clone()])
            .await?
            .into_iter()
            .next()
            .flatten();

        if !force {
            if let (Some(prev), Some(cur)) = (previous_embedding, embedded.as_deref()) {
                if cosine_similarity(prev, cur) > self.topic_threshold {
                    tracing::debug!(session_id, "recollection skipped: same topic");
                    return Ok(embedded);
                }
            }
        }

        let bites = self.compute_bites(&truncated, embedded.as_deref()).await?;
        let file = RecollectionFile {
            message_uuid: message_uuid.to_string(),
            timestamp,
            bites,
        };
        write_atomic(out_path, &file)?;
        Ok(embedded)
    }

    async fn compute_bites(&self, query_text: &str, query_embedding: Option<&[f32]>) -> Result<Vec<Bite>> {
        let (bm25_hits, pool) = episode_candidate_pool(
            &self.store,
            query_text,
            consts::MAX_BM25_HITS,
            consts::RECENT_EPISODE_POOL_SIZE,
        )
        .await?;

        if pool.is_empty() {
            return Ok(Vec::new());
        }

        let bm25_scores: Vec<f64> = bm25_hits.iter().map(|h| h.score).collect();
        let bm25_norm_by_idx = crate::retrieval::ranking::normalized_bm25_for_episode_pool(&bm25_scores);
        let bm25_rowid_to_idx: std::collections::HashMap<i64, usize> =
            bm25_hits.iter().enumerate().map(|(i, h)| (h.rowid, i)).collect();

        struct Row {
            rowid: i64,
            episode: crate::types::Episode,
            vector: f32,
        }

        let rows: Vec<Row> = pool
            .into_iter()
            .map(|(rowid, episode)| {
                let vector = match (query_embedding, episode.embedding.as_deref()) {
                    (Some(q), Some(e)) => cosine_similarity(q, e),
                    _ => 0.0,
                };
                Row { rowid, episode, vector }
            })
            .collect();

        // BM25 ascending score (best = most negative first), hits only.
        let mut bm25_order: Vec<usize> = (0..rows.len())
            .filter(|&i| bm25_rowid_to_idx.contains_key(&rows[i].rowid))
            .collect();
        bm25_order.sort_by(|&a, &b| {
            bm25_scores[bm25_rowid_to_idx[&rows[a].rowid]].total_cmp(&bm25_scores[bm25_rowid_to_idx[&rows[b].rowid]])
        });
        let bm25_dense = dense_rank(
            &bm25_order
                .iter()
                .map(|&i| bm25_scores[bm25_rowid_to_idx[&rows[i].rowid]])
                .collect::<Vec<_>>(),
        );
        let bm25_rank: std::collections::HashMap<usize, u32> =
            bm25_order.iter().copied().zip(bm25_dense).collect();

        let mut vector_order: Vec<usize> = (0..rows.len()).collect();
        vector_order.sort_by(|&a, &b| rows[b].vector.total_cmp(&rows[a].vector));
        let vector_dense = dense_rank(&vector_order.iter().map(|&i| f64::from(-rows[i].vector)).collect::<Vec<_>>());
        let vector_rank: std::collections::HashMap<usize, u32> =
            vector_order.iter().copied().zip(vector_dense).collect();

        let mut recency_order: Vec<usize> = (0..rows.len()).collect();
        recency_order.sort_by(|&a, &b| rows[b].episode.created_at.cmp(&rows[a].episode.created_at));
        let recency_dense = dense_rank(
            &recency_order
                .iter()
                .map(|&i| -(rows[i].episode.created_at as f64))
                .collect::<Vec<_>>(),
        );
        let recency_rank: std::collections::HashMap<usize, u32> =
            recency_order.iter().copied().zip(recency_dense).collect();

        let mut access_order: Vec<usize> = (0..rows.len()).collect();
        access_order.sort_by(|&a, &b| rows[b].episode.access_count.cmp(&rows[a].episode.access_count));
        let access_dense = dense_rank(
            &access_order
                .iter()
                .map(|&i| -(rows[i].episode.access_count as f64))
                .collect::<Vec<_>>(),
        );
        let access_rank: std::collections::HashMap<usize, u32> =
            access_order.iter().copied().zip(access_dense).collect();

        let mut fused: Vec<(usize, f64)> = Vec::with_capacity(rows.len());
        for i in 0..rows.len() {
            let mut score = rrf_term(bm25_rank.get(&i).copied(), consts::RRF_WEIGHT_BM25, consts::RRF_K)
                + rrf_term(vector_rank.get(&i).copied(), consts::RRF_WEIGHT_VECTOR, consts::RRF_K)
                + rrf_term(recency_rank.get(&i).copied(), consts::RRF_WEIGHT_RECENCY, consts::RRF_K)
                + rrf_term(access_rank.get(&i).copied(), consts::RRF_WEIGHT_ACCESS, consts::RRF_K);
            if rows[i].episode.importance == Importance::High {
                score += consts::HIGH_IMPORTANCE_RANK_BONUS_POSITIONS / consts::RRF_K;
            }
            fused.push((i, score));
        }
        fused.sort_by(|a, b| b.1.total_cmp(&a.1));

        let now_ms = chrono::Utc::now().timestamp_millis();
        let conn = self.store.connection();
        let mut bites = Vec::new();
        // Take the top 3 by fused score, then filter out any below the
        // vector-similarity floor — truncate-then-filter, not scan-until-3
        // (spec §4.8: "Take top 3 by fused score. Filter out any whose
        // vector similarity is below 0.25"), so this yields 0-3 bites,
        // never backfilling from further down the ranked list.
        for (idx, _) in fused.into_iter().take(consts::RECOLLECTION_TOP_K) {
            let row = &rows[idx];
            if row.vector < consts::RECOLLECTOR_MIN_VECTOR_SIMILARITY {
                continue;
            }
            queries::touch_accessed_at(conn, &row.episode.id, now_ms).await?;
            bites.push(Bite {
                id: row.episode.id.clone(),
                bite: row.episode.summary.clone(),
                date: row.episode.created_at,
                importance: row.episode.importance,
            });
        }
        Ok(bites)
    }
}

fn write_atomic(path: &Path, file: &RecollectionFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(EngramError::Io)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, serde_json::to_vec_pretty(file)?).map_err(EngramError::Io)?;
    std::fs::rename(&tmp, path).map_err(EngramError::Io)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let name = format!("{}.tmp", p.file_name().and_then(|n| n.to_str()).unwrap_or("recollection"));
    p.set_file_name(name);
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use engram_test_utils::FakeEmbedder;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_a_valid_empty_file_when_store_is_fresh() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("engram.db")).await.unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FakeEmbedder::new(16));
        let recollector = Recollector::new(store, embedder, consts::DEFAULT_TOPIC_THRESHOLD);

        let out_path = dir.path().join("recollection.json");
        recollector
            .run("sess-1", "hello there", "uuid-1", 1000, None, false, &out_path)
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&out_path).unwrap();
        let parsed: RecollectionFile = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.message_uuid, "uuid-1");
        assert!(parsed.bites.is_empty());
    }
}
