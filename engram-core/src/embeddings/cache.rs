//! Content-hash cache wrapper around any `EmbeddingProvider`.

use super::{content_hash, EmbeddingProvider};
use crate::error::Result;
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves each text against `embedding_cache` before falling through to
/// the wrapped provider, and writes newly-computed embeddings back to the
/// cache (spec §4.2).
pub struct CachingEmbedder<P> {
    inner: P,
    store: Arc<tokio::sync::Mutex<Store>>,
}

impl<P: EmbeddingProvider> CachingEmbedder<P> {
    #[must_use]
    pub fn new(inner: P, store: Arc<tokio::sync::Mutex<Store>>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl<P: EmbeddingProvider + Send + Sync> EmbeddingProvider for CachingEmbedder<P> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let mut result: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_idx = Vec::new();

        {
            let store = self.store.lock().await;
            for (i, hash) in hashes.iter().enumerate() {
                match crate::store::get_cached_embedding(store.connection(), hash).await? {
                    Some(v) => result[i] = Some(v),
                    None => miss_idx.push(i),
                }
            }
        }

        if !miss_idx.is_empty() {
            let miss_texts: Vec<String> = miss_idx.iter().map(|&i| texts[i].clone()).collect();
            let computed = self.inner.embed(&miss_texts).await?;
            let now = chrono::Utc::now().timestamp_millis();
            let store = self.store.lock().await;
            for (k, &i) in miss_idx.iter().enumerate() {
                if let Some(Some(v)) = computed.get(k) {
                    crate::store::put_cached_embedding(store.connection(), &hashes[i], v, now)
                        .await?;
                    result[i] = Some(v.clone());
                }
            }
        }

        Ok(result)
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
