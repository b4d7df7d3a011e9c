//! Used when no LLM is configured (`OPENAI_API_KEY` absent, spec §6): the
//! Daemon keeps tailing and serving BM25-only recall instead of crashing.

use super::Llm;
use crate::error::Result;
use async_trait::async_trait;

pub struct NullLlm;

#[async_trait]
impl Llm for NullLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(r#"{"memories": [], "updatedSummary": ""}"#.to_string())
    }
}
