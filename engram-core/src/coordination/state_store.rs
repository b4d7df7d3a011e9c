//! Per-session cursor state, loaded/validated/persisted with debounced
//! atomic writes (spec §4.4).

use crate::error::Result;
use crate::types::SessionState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct OnDiskDocument {
    #[serde(default)]
    sessions: HashMap<String, serde_json::Value>,
}

struct Inner {
    sessions: HashMap<String, SessionState>,
    dirty: bool,
    last_save: Option<Instant>,
}

/// Loads/validates/persists the `engram-state.json` document (spec §3
/// "SessionState", §4.4).
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    save_lock: AsyncMutex<()>,
    stopped: AtomicBool,
}

impl StateStore {
    /// Loads the document at `path`. A missing or unreadable primary file
    /// falls back to a sibling `.tmp`; if both fail, starts fresh — never a
    /// hard error, since losing cursor state only means re-streaming a
    /// transcript suffix (tailer dedup absorbs the duplication).
    pub fn load(path: &Path) -> Self {
        let doc = read_document(path)
            .or_else(|| read_document(&tmp_path(path)))
            .unwrap_or_default();

        let sessions = doc
            .sessions
            .into_iter()
            .map(|(id, raw)| (id, coerce_session_state(raw)))
            .collect();

        StateStore {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                sessions,
                dirty: false,
                last_save: None,
            }),
            save_lock: AsyncMutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Reads a session's state, if any.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.inner.lock().sessions.get(session_id).cloned()
    }

    /// Overwrites a session's state and marks the document dirty.
    pub fn set(&self, session_id: &str, state: SessionState) {
        let mut inner = self.inner.lock();
        inner.sessions.insert(session_id.to_string(), state);
        inner.dirty = true;
    }

    /// Removes sessions whose `last_extracted_at` is older than
    /// `max_age_days` AND whose id is not in `active_session_ids`.
    /// Future-dated timestamps are clamped to "now" first so a post-failure
    /// backoff can never prevent pruning.
    pub fn prune_stale(&self, max_age_days: i64, active_session_ids: &[String]) {
        let now = chrono::Utc::now().timestamp_millis();
        let cutoff = now - max_age_days * 86_400_000;
        let mut inner = self.inner.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|id, state| {
            let last_extracted = state.last_extracted_at.min(now);
            active_session_ids.contains(id) || last_extracted >= cutoff
        });
        if inner.sessions.len() != before {
            inner.dirty = true;
        }
    }

    /// Persists the document unconditionally (tmp + rename for atomic
    /// visibility). Clears the dirty flag and debounce clock on success.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = {
            let mut inner = self.inner.lock();
            inner.dirty = false;
            inner.last_save = Some(Instant::now());
            inner.sessions.clone()
        };
        write_atomic(&self.path, &snapshot)?;
        Ok(())
    }

    /// Debounces writes to at most one per 5 seconds (spec §4.4
    /// `saveSoon`). Intended to be called after every mutating operation;
    /// actually flushes only if the debounce window has elapsed.
    pub async fn save_soon(self: &Arc<Self>) -> Result<()> {
        let should_save = {
            let inner = self.inner.lock();
            inner.dirty
                && inner.last_save.is_none_or(|t| {
                    t.elapsed() >= crate::constants::coordination::STATE_SAVE_DEBOUNCE
                })
        };
        if should_save {
            self.save().await?;
        }
        Ok(())
    }

    /// Spawns a background task that flushes every 30 seconds while the
    /// in-memory copy is dirty (spec §4.4 `startPeriodicSave`).
    pub fn start_periodic_save(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(crate::constants::coordination::STATE_PERIODIC_SAVE);
            loop {
                ticker.tick().await;
                if this.stopped.load(Ordering::Relaxed) {
                    break;
                }
                let dirty = this.inner.lock().dirty;
                if dirty {
                    let _ = this.save().await;
                }
            }
        })
    }

    /// Stops the periodic-save loop started by [`Self::start_periodic_save`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let name = format!(
        "{}.tmp",
        p.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    );
    p.set_file_name(name);
    p
}

fn read_document(path: &Path) -> Option<OnDiskDocument> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_atomic(path: &Path, sessions: &HashMap<String, SessionState>) -> Result<()> {
    let doc = serde_json::json!({ "sessions": sessions });
    let tmp = tmp_path(path);
    std::fs::write(&tmp, serde_json::to_vec_pretty(&doc)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Coerces a raw JSON value into a [`SessionState`], applying the safe
/// defaults from spec §4.4: invalid byte-offset -> 0, invalid numeric
/// fields -> current time or zero, invalid strings -> empty string.
fn coerce_session_state(raw: serde_json::Value) -> SessionState {
    let now = chrono::Utc::now().timestamp_millis();
    let obj = raw.as_object();
    let get_u64 = |key: &str| -> u64 {
        obj.and_then(|o| o.get(key))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    };
    let get_i64_or_now = |key: &str| -> i64 {
        obj.and_then(|o| o.get(key))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(now)
    };
    let get_string = |key: &str| -> String {
        obj.and_then(|o| o.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };

    SessionState {
        byte_offset: get_u64("byte_offset"),
        last_extracted_at: get_i64_or_now("last_extracted_at"),
        messages_since_extraction: get_u64("messages_since_extraction"),
        rolling_summary: get_string("rolling_summary"),
        last_user_message_uuid: get_string("last_user_message_uuid"),
        created_at: get_i64_or_now("created_at"),
        last_buffer_summary: get_string("last_buffer_summary"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_byte_equal_session_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engram-state.json");
        let store = StateStore::load(&path);
        store.set(
            "sess-1",
            SessionState {
                byte_offset: 1234,
                last_extracted_at: 100,
                messages_since_extraction: 3,
                rolling_summary: "hi".into(),
                last_user_message_uuid: "uuid-1".into(),
                created_at: 50,
                last_buffer_summary: "buf".into(),
            },
        );
        store.save().await.unwrap();

        let reloaded = StateStore::load(&path);
        let got = reloaded.get("sess-1").unwrap();
        assert_eq!(got.byte_offset, 1234);
        assert_eq!(got.rolling_summary, "hi");
    }

    #[test]
    fn invalid_fields_coerce_to_safe_defaults() {
        let raw = serde_json::json!({ "byte_offset": "not a number", "rolling_summary": 42 });
        let coerced = coerce_session_state(raw);
        assert_eq!(coerced.byte_offset, 0);
        assert_eq!(coerced.rolling_summary, "");
    }

    #[test]
    fn prune_stale_clamps_future_timestamps_before_comparing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engram-state.json");
        let store = StateStore::load(&path);
        let far_future = chrono::Utc::now().timestamp_millis() + 1_000_000_000;
        store.set(
            "sess-old",
            SessionState {
                last_extracted_at: far_future,
                ..Default::default()
            },
        );
        store.prune_stale(0, &[]);
        assert!(store.get("sess-old").is_none());
    }
}
