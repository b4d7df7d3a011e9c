//! LLM-driven extraction: turns a rolling summary plus new transcript
//! messages into validated candidate memories, then upserts them against a
//! per-batch episode snapshot (spec §4.9).

use crate::constants::{lifecycle, retrieval::MERGE_SIMILARITY_THRESHOLD};
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::error::Result;
use crate::llm::Llm;
use crate::store::{queries, Store};
use crate::types::{CandidateMemory, Episode, Importance, Layer, TranscriptMessage};
use std::sync::Arc;

/// The validated result of one extraction call.
pub struct ExtractionOutcome {
    pub memories: Vec<CandidateMemory>,
    pub updated_summary: String,
}

#[derive(serde::Deserialize)]
struct RawResponse {
    #[serde(default)]
    memories: Vec<serde_json::Value>,
    #[serde(default, rename = "updatedSummary")]
    updated_summary: Option<String>,
}

/// Drives the extraction LLM and upserts the resulting candidates.
pub struct Extractor {
    store: Arc<Store>,
    llm: Arc<dyn Llm>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Extractor {
    #[must_use]
    pub fn new(store: Arc<Store>, llm: Arc<dyn Llm>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Extractor { store, llm, embedder }
    }

    /// Builds the fixed-schema prompt, calls the LLM, and validates the
    /// response (spec §4.9 paragraph 1). Never fails on a malformed LLM
    /// response — an invalid `updatedSummary` falls back to `previous_summary`,
    /// and invalid candidates are dropped individually.
    pub async fn extract(
        &self,
        previous_summary: &str,
        messages: &[TranscriptMessage],
        project: Option<&str>,
        is_root: bool,
    ) -> Result<ExtractionOutcome> {
        let prompt = build_prompt(previous_summary, messages, project, is_root);
        let raw_response = self.llm.complete(&prompt).await?;
        Ok(parse_and_validate(&raw_response, previous_summary))
    }

    /// Upserts every candidate against a single snapshot of compatible
    /// existing episodes, fetched once for the whole batch (spec §4.9 "A
    /// snapshot MUST be fetched once per extraction batch, not per
    /// candidate").
    pub async fn upsert_batch(
        &self,
        candidates: &[CandidateMemory],
        session_id: &str,
        project: Option<&str>,
        source_type: &str,
        now_ms: i64,
    ) -> Result<()> {
        let snapshot = queries::snapshot_compatible_episodes(self.store.connection(), project).await?;
        let mut snapshot = snapshot;

        for candidate in candidates {
            let Some(embedding) = self
                .embedder
                .embed(&[candidate.summary.clone()])
                .await?
                .into_iter()
                .next()
                .flatten()
            else {
                // Embedding failed: skip the candidate (spec §4.9 step 1).
                continue;
            };

            // A global candidate matches only global existing episodes; a
            // project candidate matches only same-project existing ones.
            let match_project = if candidate.scope == Layer::Project { project } else { None };

            let best_match = snapshot
                .iter_mut()
                .filter(|ep| ep.scope == candidate.scope && ep.project.as_deref() == match_project)
                .filter_map(|ep| {
                    ep.embedding
                        .as_deref()
                        .map(|e| (cosine_similarity(&embedding, e), ep))
                })
                .max_by(|(a, _), (b, _)| a.total_cmp(b));

            match best_match {
                Some((similarity, existing)) if similarity > MERGE_SIMILARITY_THRESHOLD => {
                    merge_into(existing, candidate, &embedding, now_ms);
                    queries::update_episode(self.store.connection(), existing).await?;
                }
                _ => {
                    // Insert: force scope to 'global' if there's no project
                    // to anchor a 'project' scope to (spec §4.9 step 5).
                    let scope = if project.is_none() { Layer::Global } else { candidate.scope };
                    let episode_project = if scope == Layer::Project {
                        project.map(str::to_string)
                    } else {
                        None
                    };
                    let mut new_episode = Episode {
                        id: Episode::new_id(),
                        session_id: session_id.to_string(),
                        project: episode_project,
                        scope,
                        summary: candidate.summary.clone(),
                        entities: candidate.entities.clone(),
                        importance: candidate.importance,
                        source_type: source_type.to_string(),
                        full_content: Some(candidate.full_content.clone()),
                        embedding: Some(embedding),
                        created_at: now_ms,
                        accessed_at: now_ms,
                        access_count: 0,
                        graduated_at: None,
                    };
                    new_episode.validate_scope()?;
                    queries::insert_episode(self.store.connection(), &new_episode).await?;
                    snapshot.push(new_episode);
                }
            }
        }
        Ok(())
    }
}

fn merge_into(existing: &mut Episode, candidate: &CandidateMemory, new_embedding: &[f32], now_ms: i64) {
    existing.summary = truncate_keep_suffix(
        &format!("{} | {}", existing.summary, candidate.summary),
        lifecycle::MAX_SUMMARY_LEN,
    );
    existing.full_content = Some(truncate_keep_suffix(
        &format!(
            "{}\n---\n{}",
            existing.full_content.clone().unwrap_or_default(),
            candidate.full_content
        ),
        lifecycle::MAX_FULL_CONTENT_LEN,
    ));
    existing.entities = candidate.entities.clone();
    existing.importance = candidate.importance;
    existing.accessed_at = now_ms;
    existing.access_count += 1;
    // Re-embed using the new candidate's embedding: an approximation, since
    // the merged summary is dominated by the new suffix once truncated.
    existing.embedding = Some(new_embedding.to_vec());
}

/// Truncates to `max_len` chars, keeping the *tail* when it overflows (the
/// new content, appended last, is what survives).
fn truncate_keep_suffix(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_string()
    } else {
        chars[chars.len() - max_len..].iter().collect()
    }
}

fn build_prompt(previous_summary: &str, messages: &[TranscriptMessage], project: Option<&str>, is_root: bool) -> String {
    let transcript: String = messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are extracting durable memories from a coding session.\n\
         Project: {}\nRoot session: {is_root}\nPrevious summary: {previous_summary}\n\n\
         New messages:\n{transcript}\n\n\
         Respond with JSON: {{\"memories\": [{{\"summary\": str, \"full_content\": str, \
         \"entities\": [str], \"importance\": \"normal\"|\"high\", \"scope\": \"global\"|\"project\"}}], \
         \"updatedSummary\": str}}",
        project.unwrap_or("(none)"),
    )
}

/// Validates a raw LLM response against spec §4.9's rules. Per-field
/// failures fall back to defaults; a candidate missing a non-empty summary
/// is dropped entirely rather than stored half-valid.
fn parse_and_validate(raw: &str, previous_summary: &str) -> ExtractionOutcome {
    let parsed: Option<RawResponse> = serde_json::from_str(raw).ok();
    let Some(parsed) = parsed else {
        return ExtractionOutcome {
            memories: Vec::new(),
            updated_summary: previous_summary.to_string(),
        };
    };

    let updated_summary = parsed
        .updated_summary
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| previous_summary.to_string());

    let memories = parsed
        .memories
        .into_iter()
        .filter_map(|raw_candidate| validate_candidate(&raw_candidate))
        .collect();

    ExtractionOutcome { memories, updated_summary }
}

fn validate_candidate(raw: &serde_json::Value) -> Option<CandidateMemory> {
    let summary = raw.get("summary")?.as_str()?.trim();
    if summary.is_empty() {
        return None;
    }
    let summary: String = summary.chars().take(lifecycle::MAX_SUMMARY_LEN).collect();

    let full_content: String = raw
        .get("full_content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .chars()
        .take(lifecycle::MAX_FULL_CONTENT_LEN)
        .collect();

    let entities: Vec<String> = raw
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| e.as_str().map(str::to_string))
                .take(lifecycle::MAX_ENTITIES)
                .collect()
        })
        .unwrap_or_default();

    let importance = match raw.get("importance").and_then(|v| v.as_str()) {
        Some("high") => Importance::High,
        _ => Importance::Normal,
    };

    let scope = match raw.get("scope").and_then(|v| v.as_str()) {
        Some("project") => Layer::Project,
        _ => Layer::Global,
    };

    Some(CandidateMemory {
        summary,
        full_content,
        entities,
        importance,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_candidates_with_empty_summary() {
        let raw = serde_json::json!({"summary": "   ", "full_content": "x"});
        assert!(validate_candidate(&raw).is_none());
    }

    #[test]
    fn defaults_invalid_importance_and_scope() {
        let raw = serde_json::json!({"summary": "s", "full_content": "f", "importance": "urgent", "scope": "team"});
        let candidate = validate_candidate(&raw).unwrap();
        assert_eq!(candidate.importance, Importance::Normal);
        assert_eq!(candidate.scope, Layer::Global);
    }

    #[test]
    fn malformed_response_falls_back_to_previous_summary() {
        let outcome = parse_and_validate("not json", "old summary");
        assert_eq!(outcome.updated_summary, "old summary");
        assert!(outcome.memories.is_empty());
    }

    #[test]
    fn truncate_keep_suffix_keeps_the_tail() {
        let s = "abcdefgh";
        assert_eq!(truncate_keep_suffix(s, 4), "efgh");
    }
}
