//! OpenAI-compatible embeddings endpoint, grounded on
//! `memory-core::embeddings::openai`'s reqwest-based client shape, gated
//! behind the `openai` feature exactly as the teacher gates it.

use super::EmbeddingProvider;
use crate::error::{EngramError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMS: usize = 1536;
/// OpenAI's embeddings endpoint caps batch size well above what a single
/// recollection/extraction call produces, but we still chunk defensively.
const MAX_BATCH: usize = 256;

pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
}

impl OpenAiEmbeddingProvider {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dims: DEFAULT_DIMS,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = vec![None; texts.len()];
        for (offset, chunk) in texts.chunks(MAX_BATCH).enumerate() {
            let base = offset * MAX_BATCH;
            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&EmbeddingRequest {
                    model: &self.model,
                    input: chunk,
                })
                .send()
                .await
                .map_err(|e| EngramError::Downstream(format!("openai embeddings request: {e}")))?;

            if !resp.status().is_success() {
                // A failed batch leaves those slots `None`; the caller falls
                // back to lexical scoring rather than treating this as fatal.
                continue;
            }

            let parsed: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| EngramError::Downstream(format!("openai embeddings response: {e}")))?;
            for item in parsed.data {
                if let Some(slot) = out.get_mut(base + item.index) {
                    *slot = Some(item.embedding);
                }
            }
        }
        Ok(out)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        &self.model
    }
}
