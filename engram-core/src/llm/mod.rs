//! The extraction LLM contract (spec §6, out-of-core but needed for a
//! compilable crate — see SPEC_FULL.md §1b).

pub mod null;

#[cfg(feature = "openai")]
pub mod openai;

use crate::error::Result;
use async_trait::async_trait;

/// A chat-completion-style call used to drive the Extractor's
/// summary-plus-candidate-memories prompt.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Sends `prompt` and returns the raw completion text, which the
    /// Extractor then validates against its JSON schema.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
