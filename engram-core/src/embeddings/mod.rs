//! `EmbeddingProvider`: maps strings to fixed-dimension float vectors,
//! cached by content hash (spec §4.2). Grounded on the trait shape of
//! `memory-core::embeddings::provider::EmbeddingProvider`, adapted so a
//! slot returns `None` on permanent per-text failure instead of
//! propagating one bad text as a whole-batch error.

mod cache;
pub mod mock;

#[cfg(feature = "openai")]
pub mod openai;

pub use cache::CachingEmbedder;

use crate::error::Result;
use async_trait::async_trait;

/// A provider that maps text to a fixed-dimension embedding vector.
///
/// Callers MUST treat a `None` slot as "no semantic signal" and fall back to
/// lexical scoring; they MUST NOT substitute a zero vector, because zero
/// vectors pollute cosine-similarity comparisons with an ambiguous zero
/// denominator (spec §4.2).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, preserving input order. Implementations MAY
    /// internally chunk the batch to respect a model-specific limit.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;

    /// The fixed dimensionality this provider produces.
    fn dims(&self) -> usize;

    /// A short identifier used for logging/diagnostics only.
    fn name(&self) -> &str;
}

/// Tries each provider in order for a given text, falling through to the
/// next on failure (spec §4.2 "Provider chain"). Cache writes record the
/// successful embedding regardless of which provider produced it — callers
/// should wrap the resulting chain in a [`CachingEmbedder`].
pub struct ProviderChain {
    providers: Vec<std::sync::Arc<dyn EmbeddingProvider>>,
}

impl ProviderChain {
    #[must_use]
    pub fn new(providers: Vec<std::sync::Arc<dyn EmbeddingProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl EmbeddingProvider for ProviderChain {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut result: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut remaining: Vec<usize> = (0..texts.len()).collect();

        for provider in &self.providers {
            if remaining.is_empty() {
                break;
            }
            let batch: Vec<String> = remaining.iter().map(|&i| texts[i].clone()).collect();
            let out = provider.embed(&batch).await?;
            let mut still_remaining = Vec::new();
            for (k, idx) in remaining.iter().enumerate() {
                match out.get(k).cloned().flatten() {
                    Some(v) => result[*idx] = Some(v),
                    None => still_remaining.push(*idx),
                }
            }
            remaining = still_remaining;
        }
        Ok(result)
    }

    fn dims(&self) -> usize {
        self.providers.first().map_or(0, |p| p.dims())
    }

    fn name(&self) -> &str {
        "provider-chain"
    }
}

/// Cosine similarity of two equal-length vectors, in `[-1, 1]`. Returns 0
/// for a zero-magnitude vector rather than dividing by zero — callers that
/// hold a `None` embedding never reach this function in the first place
/// (spec §4.2), so this guard only protects against a degenerate non-null
/// zero vector slipping in from a misbehaving provider.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// SHA-256 hex digest of a text's exact bytes, the cache key from spec §4.2.
#[must_use]
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
