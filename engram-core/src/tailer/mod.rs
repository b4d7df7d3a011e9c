//! Incremental, crash-safe JSONL transcript tailing with persisted
//! byte-cursor state (spec §4.11). One tailer per active session file.

mod decoder;

use crate::constants::tailer as consts;
use crate::coordination::StateStore;
use crate::error::{EngramError, Result};
use crate::extract::Extractor;
use crate::recollect::Recollector;
use crate::types::{SessionState, TranscriptMessage};
use decoder::Utf8BoundaryDecoder;
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebounceEventResult, Debouncer};
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, warn};

struct MutableState {
    cursor: u64,
    decoder: Utf8BoundaryDecoder,
    pending_line: String,
    ring_buffer: VecDeque<String>,
    extraction_buffer: VecDeque<TranscriptMessage>,
    messages_since_extraction: u64,
    last_extraction_at: i64,
    first_extraction_done: bool,
    extracting: bool,
    extraction_pending: bool,
    backoff_until: Option<std::time::Instant>,
    backoff_idx: usize,
    rolling_summary: String,
    last_user_message_uuid: String,
}

/// Tails one session's JSONL transcript, feeding complete messages into the
/// extraction buffer and triggering the [`Extractor`] on the thresholds in
/// spec §4.11.
pub struct SessionTailer {
    session_id: String,
    path: PathBuf,
    project: Option<String>,
    is_root: bool,
    state_store: Arc<StateStore>,
    extractor: Arc<Extractor>,
    recollector: Option<Arc<Recollector>>,
    recollection_path: Option<PathBuf>,
    extraction_semaphore: Arc<Semaphore>,
    caught_up: AtomicBool,
    stopped: AtomicBool,
    state: Mutex<MutableState>,
    watcher: Mutex<Option<Debouncer<notify_debouncer_mini::notify::RecommendedWatcher>>>,
}

impl SessionTailer {
    #[must_use]
    pub fn new(
        session_id: String,
        path: PathBuf,
        project: Option<String>,
        is_root: bool,
        initial_state: SessionState,
        state_store: Arc<StateStore>,
        extractor: Arc<Extractor>,
        recollector: Option<Arc<Recollector>>,
        recollection_path: Option<PathBuf>,
        extraction_semaphore: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(SessionTailer {
            session_id,
            path,
            project,
            is_root,
            state_store,
            extractor,
            recollector,
            recollection_path,
            extraction_semaphore,
            caught_up: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            state: Mutex::new(MutableState {
                cursor: initial_state.byte_offset,
                decoder: Utf8BoundaryDecoder::new(),
                pending_line: String::new(),
                ring_buffer: VecDeque::with_capacity(consts::RING_BUFFER_SIZE),
                extraction_buffer: VecDeque::with_capacity(consts::EXTRACTION_BUFFER_CAP),
                messages_since_extraction: initial_state.messages_since_extraction,
                last_extraction_at: initial_state.last_extracted_at,
                first_extraction_done: initial_state.last_extracted_at > 0,
                extracting: false,
                extraction_pending: false,
                backoff_until: None,
                backoff_idx: 0,
                rolling_summary: initial_state.rolling_summary,
                last_user_message_uuid: initial_state.last_user_message_uuid,
            }),
            watcher: Mutex::new(None),
        })
    }

    /// Drains from the saved cursor to EOF, then marks caught-up and starts
    /// the debounced filesystem watcher (spec §4.11 "start").
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for _ in 0..consts::MAX_DRAIN_ITERATIONS {
            let read = self.drain_once().await?;
            if read == 0 {
                break;
            }
        }
        self.caught_up.store(true, Ordering::Relaxed);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let debouncer = spawn_watcher(self.path.clone(), consts::WATCH_DEBOUNCE, tx)?;
        *self.watcher.lock().await = Some(debouncer);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if this.stopped.load(Ordering::Relaxed) {
                    break;
                }
                for _ in 0..consts::MAX_DRAIN_ITERATIONS {
                    match this.drain_once().await {
                        Ok(0) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(session_id = %this.session_id, error = %e, "tailer drain failed");
                            break;
                        }
                    }
                }
            }
        });

        // A buffered, idle session (no new lines arriving) would otherwise
        // never re-check the elapsed-time trigger, since that check only
        // runs from `process_line` on a freshly observed message. This
        // ticker gives `EXTRACTION_TIME_TRIGGER` a chance to fire on its
        // own (spec §4.11: an independent periodic trigger).
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(consts::WARM_TIMER_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                if this.stopped.load(Ordering::Relaxed) {
                    break;
                }
                let time_elapsed = {
                    let state = this.state.lock().await;
                    !state.extraction_buffer.is_empty()
                        && chrono::Utc::now().timestamp_millis() - state.last_extraction_at
                            >= consts::EXTRACTION_TIME_TRIGGER.as_millis() as i64
                };
                if time_elapsed {
                    if let Err(e) = this.maybe_extract(false).await {
                        warn!(session_id = %this.session_id, error = %e, "warm-timer extraction failed");
                    }
                }
            }
        });

        Ok(())
    }

    /// Reads up to [`consts::MAX_READ_CHUNK_BYTES`] from the cursor,
    /// processes every complete line, and returns the number of bytes read
    /// (0 meaning EOF reached).
    async fn drain_once(&self) -> Result<usize> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(EngramError::Io)?;
        let file_len = metadata.len();

        let mut state = self.state.lock().await;
        if file_len < state.cursor {
            // Truncation: the log was compacted out from under us.
            state.cursor = 0;
            state.decoder.reset();
            state.pending_line.clear();
        }

        let mut file = tokio::fs::File::open(&self.path).await.map_err(EngramError::Io)?;
        file.seek(SeekFrom::Start(state.cursor)).await.map_err(EngramError::Io)?;

        let mut buf = vec![0u8; consts::MAX_READ_CHUNK_BYTES];
        let mut total_read = 0usize;
        loop {
            let n = file.read(&mut buf[total_read..]).await.map_err(EngramError::Io)?;
            if n == 0 || total_read + n >= buf.len() {
                total_read += n;
                break;
            }
            total_read += n;
        }
        if total_read == 0 {
            return Ok(0);
        }

        let decoded = state.decoder.push(&buf[..total_read]);
        state.cursor += total_read as u64;

        let mut combined = std::mem::take(&mut state.pending_line);
        combined.push_str(&decoded);

        let ends_with_newline = combined.ends_with('\n');
        let mut lines: Vec<String> = combined.split('\n').map(str::to_string).collect();
        state.pending_line = if ends_with_newline {
            lines.pop();
            String::new()
        } else {
            lines.pop().unwrap_or_default()
        };

        drop(state);
        for line in lines {
            if !line.trim().is_empty() {
                self.process_line(&line).await?;
            }
        }
        Ok(total_read)
    }

    async fn process_line(&self, line: &str) -> Result<()> {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            return Ok(());
        };

        let role = value
            .get("message")
            .and_then(|m| m.get("role"))
            .and_then(|r| r.as_str())
            .or_else(|| value.get("type").and_then(|t| t.as_str()));
        let Some(role) = role else { return Ok(()) };
        if role != "user" && role != "assistant" {
            return Ok(());
        }

        let content = extract_text(&value);
        let content = content.trim().to_string();
        if content.is_empty() {
            return Ok(());
        }

        let uuid = value.get("uuid").and_then(|u| u.as_str()).map(str::to_string);

        let mut state = self.state.lock().await;
        if state.ring_buffer.len() >= consts::RING_BUFFER_SIZE {
            state.ring_buffer.pop_front();
        }
        state.ring_buffer.push_back(content.clone());

        if state.extraction_buffer.len() >= consts::EXTRACTION_BUFFER_CAP {
            state.extraction_buffer.pop_front();
        }
        state.extraction_buffer.push_back(TranscriptMessage {
            role: role.to_string(),
            content,
            uuid: uuid.clone(),
        });

        let mut should_extract = false;
        if role == "user" {
            state.messages_since_extraction += 1;
            if let Some(u) = uuid {
                state.last_user_message_uuid = u;
            }
            let threshold = if state.first_extraction_done {
                consts::STEADY_STATE_EXTRACTION_THRESHOLD
            } else {
                consts::INITIAL_EXTRACTION_THRESHOLD
            };
            let time_elapsed = chrono::Utc::now().timestamp_millis() - state.last_extraction_at
                >= consts::EXTRACTION_TIME_TRIGGER.as_millis() as i64;
            if state.messages_since_extraction as usize >= threshold || time_elapsed {
                should_extract = true;
            }
        }
        drop(state);

        if should_extract && self.caught_up.load(Ordering::Relaxed) {
            self.maybe_extract(false).await?;
        }
        Ok(())
    }

    /// Triggers an extraction if one isn't already in flight and backoff
    /// hasn't elapsed. `force` bypasses both the "caught up" gate (callers
    /// use it for shutdown/flush) and the backoff consumption rule (spec
    /// §4.11 "DO NOT consume the backoff on a forced flush").
    pub async fn maybe_extract(&self, force: bool) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.extracting {
                state.extraction_pending = true;
                return Ok(());
            }
            if !force {
                if let Some(until) = state.backoff_until {
                    if std::time::Instant::now() < until {
                        return Ok(());
                    }
                }
            }
            if state.extraction_buffer.is_empty() {
                return Ok(());
            }
            state.extracting = true;
        }

        let result = self.run_extraction().await;

        let mut state = self.state.lock().await;
        state.extracting = false;
        match result {
            Ok(()) => {
                state.backoff_idx = 0;
                state.backoff_until = None;
            }
            Err(ref e) => {
                warn!(session_id = %self.session_id, error = %e, "extraction failed, backing off");
                let secs = consts::BACKOFF_SCHEDULE_SECS
                    [state.backoff_idx.min(consts::BACKOFF_SCHEDULE_SECS.len() - 1)];
                state.backoff_idx = (state.backoff_idx + 1).min(consts::BACKOFF_SCHEDULE_SECS.len() - 1);
                state.backoff_until = Some(std::time::Instant::now() + std::time::Duration::from_secs(secs));
            }
        }
        let rerun = state.extraction_pending;
        state.extraction_pending = false;
        drop(state);

        if rerun {
            Box::pin(self.maybe_extract(false)).await?;
        }
        result
    }

    async fn run_extraction(&self) -> Result<()> {
        let _permit = self
            .extraction_semaphore
            .acquire()
            .await
            .map_err(|_| EngramError::Invariant("extraction semaphore closed".into()))?;

        let (snapshot_len, messages, previous_summary) = {
            let state = self.state.lock().await;
            (
                state.extraction_buffer.len(),
                state.extraction_buffer.iter().cloned().collect::<Vec<_>>(),
                state.rolling_summary.clone(),
            )
        };

        let outcome = self
            .extractor
            .extract(&previous_summary, &messages, self.project.as_deref(), self.is_root)
            .await?;

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.extractor
            .upsert_batch(&outcome.memories, &self.session_id, self.project.as_deref(), "transcript", now_ms)
            .await?;

        let mut state = self.state.lock().await;
        // Splice exactly the snapshotted prefix: messages appended during
        // the call (beyond `snapshot_len`) are preserved.
        for _ in 0..snapshot_len.min(state.extraction_buffer.len()) {
            state.extraction_buffer.pop_front();
        }
        state.rolling_summary = outcome.updated_summary.clone();
        state.messages_since_extraction = 0;
        state.last_extraction_at = now_ms;
        state.first_extraction_done = true;
        let last_user_message_uuid = state.last_user_message_uuid.clone();
        drop(state);

        self.persist_state().await?;

        if let (Some(recollector), Some(out_path)) = (&self.recollector, &self.recollection_path) {
            if let Some(last) = messages.iter().rev().find(|m| m.role == "user") {
                let _ = recollector
                    .run(&self.session_id, &last.content, &last_user_message_uuid, now_ms, None, true, out_path)
                    .await;
            }
        }

        Ok(())
    }

    async fn persist_state(&self) -> Result<()> {
        let state = self.state.lock().await;
        let snapshot = SessionState {
            byte_offset: state.cursor,
            last_extracted_at: state.last_extraction_at,
            messages_since_extraction: state.messages_since_extraction,
            rolling_summary: state.rolling_summary.clone(),
            last_user_message_uuid: state.last_user_message_uuid.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
            last_buffer_summary: String::new(),
        };
        drop(state);
        self.state_store.set(&self.session_id, snapshot);
        Ok(())
    }

    /// Stops the tailer: drains any remaining complete line, awaits an
    /// in-flight extraction (bounded), forces one final extraction if the
    /// buffer is non-empty (bounded), and persists state. Never jumps the
    /// cursor to EOF — an unread suffix re-streams on next start (spec
    /// §4.11 "stop").
    pub async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Relaxed);

        // The cursor may already sit past a final line lacking a trailing
        // newline (drain_once stashes it in `pending_line` rather than
        // re-reading it), so it must be processed here or it is lost for
        // good. A genuinely incomplete trailing byte sequence never
        // surfaces as decoded text, so `pending_line` holds only complete,
        // already-decoded content.
        let trailing_line = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending_line)
        };
        if !trailing_line.trim().is_empty() {
            self.process_line(&trailing_line).await?;
        }

        let _ = tokio::time::timeout(consts::STOP_EXTRACTION_TIMEOUT, async {
            loop {
                if !self.state.lock().await.extracting {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        })
        .await;

        let buffer_non_empty = !self.state.lock().await.extraction_buffer.is_empty();
        if buffer_non_empty {
            let _ = tokio::time::timeout(consts::STOP_EXTRACTION_TIMEOUT, self.maybe_extract(true)).await;
        }

        self.persist_state().await?;
        Ok(())
    }
}

/// Concatenates `type=="text"` content blocks when `message.content` is an
/// array; falls through to a plain string otherwise (spec §4.11 "per-entry").
fn extract_text(value: &serde_json::Value) -> String {
    let Some(content) = value.get("message").and_then(|m| m.get("content")) else {
        return String::new();
    };
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn spawn_watcher(
    path: PathBuf,
    debounce: std::time::Duration,
    on_event: mpsc::UnboundedSender<()>,
) -> Result<Debouncer<notify_debouncer_mini::notify::RecommendedWatcher>> {
    let (tx, rx) = std::sync::mpsc::channel::<DebounceEventResult>();
    let mut debouncer =
        new_debouncer(debounce, tx).map_err(|e| EngramError::Io(std::io::Error::other(e)))?;
    debouncer
        .watcher()
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| EngramError::Io(std::io::Error::other(e)))?;

    std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            if event.is_err() {
                debug!("watch event carried an error, still triggering a drain");
            }
            if on_event.send(()).is_err() {
                break;
            }
        }
    });

    Ok(debouncer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_blocks_and_ignores_non_text() {
        let value = serde_json::json!({
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "hello "},
                    {"type": "tool_use", "text": "ignored"},
                    {"type": "text", "text": "world"}
                ]
            }
        });
        assert_eq!(extract_text(&value), "hello world");
    }

    #[test]
    fn plain_string_content_passes_through() {
        let value = serde_json::json!({"message": {"role": "user", "content": "hi"}});
        assert_eq!(extract_text(&value), "hi");
    }
}
