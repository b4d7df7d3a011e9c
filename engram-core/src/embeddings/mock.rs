//! A deterministic, hash-based embedding provider used when no embedding
//! API key is configured. Grounded on `memory-core::embeddings::mock_model`'s
//! role as the always-available fallback; unlike a real model it carries no
//! semantic signal beyond lexical overlap, so BM25-only retrieval is
//! expected to dominate when this provider is in use.

use super::EmbeddingProvider;
use crate::error::Result;
use async_trait::async_trait;

const MOCK_DIMS: usize = 64;

/// Hashes each whitespace-separated token into one of `MOCK_DIMS` buckets
/// and accumulates a count, then L2-normalizes. Two texts sharing tokens
/// get non-trivial cosine similarity; texts sharing no tokens get ~0.
pub struct MockEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(texts.iter().map(|t| Some(hash_embed(t))).collect())
    }

    fn dims(&self) -> usize {
        MOCK_DIMS
    }

    fn name(&self) -> &str {
        "mock-hash-embedder"
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; MOCK_DIMS];
    for token in text.to_lowercase().split_whitespace() {
        let bucket = fnv1a(token.as_bytes()) as usize % MOCK_DIMS;
        v[bucket] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn similar_texts_score_higher_than_disjoint_ones() {
        let p = MockEmbeddingProvider;
        let out = p
            .embed(&[
                "refactor the search module".into(),
                "refactor the search index".into(),
                "bake a chocolate cake".into(),
            ])
            .await
            .unwrap();
        let a = out[0].clone().unwrap();
        let b = out[1].clone().unwrap();
        let c = out[2].clone().unwrap();
        let sim_ab = super::super::cosine_similarity(&a, &b);
        let sim_ac = super::super::cosine_similarity(&a, &c);
        assert!(sim_ab > sim_ac);
    }
}
