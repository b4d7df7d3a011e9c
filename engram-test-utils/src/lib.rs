//! Shared test fixtures for `engram-core`'s integration tests: a scripted
//! `Llm`, a deterministic hash-based `EmbeddingProvider`, and a JSONL
//! transcript builder, mirroring the teacher's `test-utils` crate shape.

use async_trait::async_trait;
use engram_core::embeddings::EmbeddingProvider;
use engram_core::error::Result;
use engram_core::llm::Llm;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Deterministic hash-to-vector embedder: the same text always produces the
/// same vector, so cosine-similarity assertions in tests are reproducible
/// without a real embedding model.
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    #[must_use]
    pub fn new(dims: usize) -> Self {
        FakeEmbedder { dims }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        Ok(texts.iter().map(|t| Some(hash_embed(t, self.dims))).collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "fake-embedder"
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for (i, byte) in text.bytes().enumerate() {
        v[i % dims] += f32::from(byte);
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// A scripted `Llm`: returns queued responses in order, looping the last
/// one once the queue is exhausted, so a test doesn't have to size the
/// queue exactly to the number of extractions it triggers.
pub struct FakeLlm {
    responses: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeLlm {
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        FakeLlm {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt this fake has received, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Llm for FakeLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.lock().push(prompt.to_string());
        let mut responses = self.responses.lock();
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses.first().cloned().unwrap_or_default())
        }
    }
}

/// Builds a JSONL transcript file under a temp directory and appends lines
/// to it incrementally, simulating a live Claude Code session log for the
/// `SessionTailer` tests (including mid-stream truncation).
pub struct TempTranscript {
    path: PathBuf,
    _dir: tempfile::TempDir,
}

impl TempTranscript {
    /// Creates an empty transcript file named `session_id.jsonl`.
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(format!("{session_id}.jsonl"));
        std::fs::File::create(&path).expect("create transcript file");
        TempTranscript { path, _dir: dir }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one `{"type": role, "message": {"role": role, "content": text}}`
    /// line, matching the transcript shape `SessionTailer` parses.
    pub fn append_message(&self, role: &str, content: &str) {
        let line = serde_json::json!({
            "type": role,
            "message": { "role": role, "content": content },
            "uuid": uuid::Uuid::new_v4().to_string(),
        });
        self.append_raw_line(&line.to_string());
    }

    /// Appends a raw JSON line verbatim, for tests that need malformed or
    /// block-array content shapes.
    pub fn append_raw_line(&self, json_line: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .expect("open transcript for append");
        writeln!(f, "{json_line}").expect("append line");
    }

    /// Truncates the file back to zero bytes, simulating a compacted log.
    pub fn truncate(&self) {
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .expect("truncate transcript");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_hashes_to_the_same_vector() {
        let embedder = FakeEmbedder::new(8);
        let a = embedder.embed(&["hello".to_string()]).await.unwrap();
        let b = embedder.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fake_llm_records_prompts_in_order() {
        let llm = FakeLlm::new(vec!["{}".to_string()]);
        llm.complete("first").await.unwrap();
        llm.complete("second").await.unwrap();
        assert_eq!(llm.prompts(), vec!["first".to_string(), "second".to_string()]);
    }
}
