//! The data model shared by every component, grounded on `memory-core::types`'s
//! practice of centralizing validation constants next to the structs they
//! bound.

use serde::{Deserialize, Serialize};

/// A document layer: cross-project ("global") or scoped to one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Global,
    Project,
}

/// Episode importance classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Normal,
    High,
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Normal
    }
}

/// A passage indexed from a memory document (see spec §3 "Chunk").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub layer: Layer,
    pub project: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub content_hash: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub updated_at: i64,
}

/// A distilled memory candidate (see spec §3 "Episode").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub session_id: String,
    pub project: Option<String>,
    pub scope: Layer,
    pub summary: String,
    pub entities: Vec<String>,
    pub importance: Importance,
    pub source_type: String,
    pub full_content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
    pub accessed_at: i64,
    pub access_count: i64,
    pub graduated_at: Option<i64>,
}

impl Episode {
    /// Validates the scope/project pairing invariant from spec §3.
    ///
    /// `scope == Project` requires a non-null project; `scope == Global`
    /// requires a null one. Violating either is an `Invariant` error, never
    /// a silently-corrected write.
    pub fn validate_scope(&self) -> crate::Result<()> {
        match (self.scope, &self.project) {
            (Layer::Project, None) => Err(crate::EngramError::Invariant(
                "scope='project' requires a non-null project".into(),
            )),
            (Layer::Global, Some(_)) => Err(crate::EngramError::Invariant(
                "scope='global' requires a null project".into(),
            )),
            _ => Ok(()),
        }
    }

    /// An episode is "compressed" once its full content has been nulled.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.full_content.is_none()
    }

    /// Generates a fresh episode id: `ep_` + 12 lowercase-hex characters.
    #[must_use]
    pub fn new_id() -> String {
        let raw = uuid::Uuid::new_v4();
        let hex = raw.simple().to_string();
        format!("ep_{}", &hex[..12])
    }
}

/// Content-hash -> embedding cache row (see spec §3 "EmbeddingCache").
#[derive(Debug, Clone)]
pub struct EmbeddingCacheEntry {
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub dims: usize,
    pub updated_at: i64,
}

/// Per-session cursor and rolling-context state, persisted by `StateStore`
/// (see spec §3 "SessionState"). Lives in a JSON file, not the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub byte_offset: u64,
    #[serde(default)]
    pub last_extracted_at: i64,
    #[serde(default)]
    pub messages_since_extraction: u64,
    #[serde(default)]
    pub rolling_summary: String,
    #[serde(default)]
    pub last_user_message_uuid: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_buffer_summary: String,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            byte_offset: 0,
            last_extracted_at: 0,
            messages_since_extraction: 0,
            rolling_summary: String::new(),
            last_user_message_uuid: String::new(),
            created_at: 0,
            last_buffer_summary: String::new(),
        }
    }
}

/// A short one-line recollection of an episode (spec GLOSSARY "Bite").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bite {
    pub id: String,
    pub bite: String,
    pub date: i64,
    pub importance: Importance,
}

/// One file per session: the pre-computed top-K bites for the last user
/// message observed by the tailer (spec §3 "RecollectionFile").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecollectionFile {
    #[serde(rename = "messageUuid")]
    pub message_uuid: String,
    pub timestamp: i64,
    pub bites: Vec<Bite>,
}

/// A single hybrid-search result (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub path: String,
    pub layer: Layer,
    pub project: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub text: String,
    pub final_score: f64,
}

/// One raw chat message read off a JSONL transcript line.
#[derive(Debug, Clone)]
pub struct TranscriptMessage {
    pub role: String,
    pub content: String,
    pub uuid: Option<String>,
}

/// A validated candidate memory produced by the extractor from one LLM call.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateMemory {
    pub summary: String,
    pub full_content: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub scope: Layer,
}

impl Default for Layer {
    fn default() -> Self {
        Layer::Global
    }
}

/// Closed tagged-union schema for UDS messages (spec §4.6, DESIGN FLAG
/// "weakly typed cross-process events"). Unknown events fail to deserialize
/// and are dropped by the caller rather than panicking the accept loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum UdsMessage {
    Ping,
    Flush {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Recollect {
        #[serde(rename = "sessionId")]
        session_id: String,
        message: String,
        #[serde(rename = "messageUuid")]
        message_uuid: String,
    },
}
