//! The top-level orchestrator: owns the Store, StateStore, UdsServer, and
//! one SessionTailer per active transcript file (spec §4.12).

use crate::constants::daemon as consts;
use crate::consolidate::Consolidator;
use crate::coordination::{PidGuard, StateStore, UdsHandler, UdsServer};
use crate::embeddings::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::extract::Extractor;
use crate::llm::Llm;
use crate::recollect::Recollector;
use crate::store::Store;
use crate::tailer::SessionTailer;
use crate::types::UdsMessage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// The filesystem layout under `~/.claude-memory/` (spec §6 "Filesystem
/// layout").
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub home: PathBuf,
    pub transcripts_root: PathBuf,
}

impl DaemonPaths {
    #[must_use]
    pub fn new(home: PathBuf, transcripts_root: PathBuf) -> Self {
        DaemonPaths { home, transcripts_root }
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.home.join("memory.db")
    }

    #[must_use]
    pub fn pid_path(&self) -> PathBuf {
        self.home.join("engram.pid")
    }

    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.home.join("engram.sock")
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.home.join("engram-state.json")
    }

    #[must_use]
    pub fn recollections_dir(&self) -> PathBuf {
        self.home.join("recollections")
    }

    #[must_use]
    pub fn recollection_path(&self, session_id: &str) -> PathBuf {
        self.recollections_dir().join(format!("{session_id}.json"))
    }

    #[must_use]
    pub fn consolidate_lock_path(&self) -> PathBuf {
        self.home.join("consolidate.lock")
    }

    #[must_use]
    pub fn memory_dir(&self) -> PathBuf {
        self.home.clone()
    }
}

/// One discovered transcript file: a candidate for a spawned tailer.
struct DiscoveredSession {
    session_id: String,
    path: PathBuf,
    project: Option<String>,
    mtime: std::time::SystemTime,
}

/// Owns every long-lived resource of a running daemon process.
pub struct Daemon {
    paths: DaemonPaths,
    #[allow(dead_code)] // held so the PID file is removed on Drop
    pid_guard: PidGuard,
    store: Arc<Store>,
    state_store: Arc<StateStore>,
    extractor: Arc<Extractor>,
    recollector: Arc<Recollector>,
    consolidator: Consolidator,
    tailers: Mutex<HashMap<String, Arc<SessionTailer>>>,
    extraction_semaphore: Arc<Semaphore>,
    uds: Mutex<Option<UdsServer>>,
    maintenance_running: AtomicBool,
    consolidation_running: AtomicBool,
    shutting_down: AtomicBool,
}

impl Daemon {
    /// Acquires the PID guard, opens the Store, loads `StateStore`, and
    /// builds the Extractor/Recollector/Consolidator. Does not yet bind the
    /// UDS listener or spawn tailers — call [`Daemon::run`] for that.
    pub async fn new(
        paths: DaemonPaths,
        llm: Arc<dyn Llm>,
        embedder: Arc<dyn EmbeddingProvider>,
        topic_threshold: f32,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&paths.home).map_err(EngramError::Io)?;
        let pid_guard = PidGuard::acquire(&paths.pid_path())?;

        let store = Arc::new(Store::open(&paths.db_path()).await?);
        let state_store = Arc::new(StateStore::load(&paths.state_path()));
        state_store.start_periodic_save();

        let extractor = Arc::new(Extractor::new(Arc::clone(&store), llm, Arc::clone(&embedder)));
        let recollector = Arc::new(Recollector::new(Arc::clone(&store), embedder, topic_threshold));
        let consolidator = Consolidator::new(
            Arc::clone(&store),
            paths.consolidate_lock_path(),
            paths.memory_dir(),
        );

        Ok(Arc::new(Daemon {
            paths,
            pid_guard,
            store,
            state_store,
            extractor,
            recollector,
            consolidator,
            tailers: Mutex::new(HashMap::new()),
            extraction_semaphore: Arc::new(Semaphore::new(crate::constants::tailer::MAX_CONCURRENT_EXTRACTIONS)),
            uds: Mutex::new(None),
            maintenance_running: AtomicBool::new(false),
            consolidation_running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// Binds the UDS listener, discovers sessions on disk, spawns tailers in
    /// staggered batches, starts a watcher for new transcript files, and
    /// schedules the maintenance/consolidation passes. Returns once a
    /// shutdown signal (SIGTERM/SIGINT) arrives, after running the full
    /// shutdown sequence.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let server = UdsServer::bind(&self.paths.socket_path(), Arc::clone(self)).await?;
        *self.uds.lock().await = Some(server);

        self.spawn_discovered_tailers().await?;
        self.spawn_new_file_watcher();
        self.spawn_maintenance_loop();
        self.spawn_consolidation_loop();

        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        self.shutdown().await
    }

    async fn spawn_discovered_tailers(self: &Arc<Self>) -> Result<()> {
        let mut discovered = discover_sessions(&self.paths.transcripts_root)?;
        discovered.sort_by(|a, b| b.mtime.cmp(&a.mtime));

        for batch in discovered.chunks(consts::STARTUP_BATCH_SIZE) {
            for session in batch {
                if let Err(e) = self.spawn_tailer(&session.session_id, &session.path, session.project.clone()).await {
                    warn!(session_id = %session.session_id, error = %e, "failed to spawn tailer");
                }
            }
            tokio::time::sleep(consts::STARTUP_BATCH_DELAY).await;
        }
        Ok(())
    }

    async fn spawn_tailer(self: &Arc<Self>, session_id: &str, path: &Path, project: Option<String>) -> Result<()> {
        let mut tailers = self.tailers.lock().await;
        if tailers.contains_key(session_id) {
            return Ok(());
        }
        let initial_state = self.state_store.get(session_id).unwrap_or_default();
        let tailer = SessionTailer::new(
            session_id.to_string(),
            path.to_path_buf(),
            project,
            true,
            initial_state,
            Arc::clone(&self.state_store),
            Arc::clone(&self.extractor),
            Some(Arc::clone(&self.recollector)),
            Some(self.paths.recollection_path(session_id)),
            Arc::clone(&self.extraction_semaphore),
        );
        tailer.start().await?;
        tailers.insert(session_id.to_string(), tailer);
        Ok(())
    }

    fn spawn_new_file_watcher(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let root = this.paths.transcripts_root.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(consts::MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                if this.shutting_down.load(Ordering::Relaxed) {
                    break;
                }
                if let Ok(discovered) = discover_sessions(&root) {
                    for session in discovered {
                        if let Err(e) = this.spawn_tailer(&session.session_id, &session.path, session.project).await {
                            warn!(error = %e, "failed to spawn tailer for newly discovered session");
                        }
                    }
                }
            }
        });
    }

    fn spawn_maintenance_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(consts::MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                if this.shutting_down.load(Ordering::Relaxed) {
                    break;
                }
                if this
                    .maintenance_running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
                if let Err(e) = this.run_maintenance_pass().await {
                    warn!(error = %e, "maintenance pass failed");
                }
                this.maintenance_running.store(false, Ordering::SeqCst);
            }
        });
    }

    fn spawn_consolidation_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(consts::CONSOLIDATION_INTERVAL);
            loop {
                interval.tick().await;
                if this.shutting_down.load(Ordering::Relaxed) {
                    break;
                }
                if this
                    .consolidation_running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Err(e) = this.consolidator.run(now_ms).await {
                    warn!(error = %e, "consolidation pass failed");
                }
                this.consolidation_running.store(false, Ordering::SeqCst);
            }
        });
    }

    /// Evicts tailers whose backing file is gone or too old, prunes stale
    /// session state (preserving still-active ids), and checks RSS.
    async fn run_maintenance_pass(&self) -> Result<()> {
        let mut tailers = self.tailers.lock().await;
        let mut evicted = Vec::new();
        for (session_id, _tailer) in tailers.iter() {
            let path = self.paths.transcripts_root.join(format!("{session_id}.jsonl"));
            let stale = match std::fs::metadata(&path) {
                Ok(metadata) => file_age_days(&metadata) > consts::MAX_FILE_AGE_DAYS,
                Err(_) => true,
            };
            if stale {
                evicted.push(session_id.clone());
            }
        }
        for session_id in &evicted {
            if let Some(tailer) = tailers.remove(session_id) {
                let _ = tailer.stop().await;
            }
        }
        let active_ids: Vec<String> = tailers.keys().cloned().collect();
        drop(tailers);

        self.state_store.prune_stale(consts::MAX_FILE_AGE_DAYS, &active_ids);
        self.state_store.save_soon().await?;

        let rss = current_rss_bytes();
        if rss >= consts::MEMORY_RESTART_BYTES {
            warn!(rss, "memory usage over restart threshold, shutting down with restart code");
            self.shutting_down.store(true, Ordering::SeqCst);
            std::process::exit(consts::RESTART_EXIT_CODE);
        } else if rss >= consts::MEMORY_WARN_BYTES {
            warn!(rss, "memory usage over warn threshold");
        }
        Ok(())
    }

    /// Stops all tailers in parallel (each bounded), closes the UDS server,
    /// flushes state, and releases the PID guard (via Drop).
    pub async fn shutdown(&self) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);

        let mut tailers = self.tailers.lock().await;
        let handles: Vec<_> = tailers
            .drain()
            .map(|(_, tailer)| {
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(consts::SHUTDOWN_TAILER_TIMEOUT, tailer.stop()).await;
                })
            })
            .collect();
        drop(tailers);
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(server) = self.uds.lock().await.take() {
            server.shutdown().await;
        }

        self.state_store.save().await?;
        self.state_store.stop();
        Ok(())
    }
}

#[async_trait::async_trait]
impl UdsHandler for Daemon {
    async fn handle(&self, message: UdsMessage) -> Result<serde_json::Value> {
        match message {
            UdsMessage::Ping => Ok(serde_json::json!({"pong": true})),
            UdsMessage::Flush { session_id } => {
                let tailer = self.tailers.lock().await.get(&session_id).cloned();
                if let Some(tailer) = tailer {
                    tailer.maybe_extract(true).await?;
                }
                Ok(serde_json::json!({"flushed": true}))
            }
            UdsMessage::Recollect {
                session_id,
                message,
                message_uuid,
            } => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                let out_path = self.paths.recollection_path(&session_id);
                self.recollector
                    .run(&session_id, &message, &message_uuid, now_ms, None, true, &out_path)
                    .await?;
                Ok(serde_json::json!({"recollected": true}))
            }
        }
    }
}

/// One-level directory walk of `root`: each subdirectory is treated as a
/// project context (its name becomes the `project` tag), each `*.jsonl`
/// file directly inside it (or directly inside `root` itself, for
/// project-less sessions) is one session transcript. This is a
/// simplification of spec §6's project-roots discovery walk — see the
/// corresponding Open Question decision.
fn discover_sessions(root: &Path) -> Result<Vec<DiscoveredSession>> {
    let mut out = Vec::new();
    if !root.exists() {
        return Ok(out);
    }
    collect_jsonl(root, None, &mut out)?;
    for entry in std::fs::read_dir(root).map_err(EngramError::Io)? {
        let entry = entry.map_err(EngramError::Io)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.starts_with('.') && name != ".claude" {
            continue;
        }
        if name == "node_modules" || name == "venv" {
            continue;
        }
        collect_jsonl(&path, Some(name.to_string()), &mut out)?;
    }
    Ok(out)
}

fn collect_jsonl(dir: &Path, project: Option<String>, out: &mut Vec<DiscoveredSession>) -> Result<()> {
    for entry in std::fs::read_dir(dir).map_err(EngramError::Io)? {
        let entry = entry.map_err(EngramError::Io)?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::UNIX_EPOCH);
        out.push(DiscoveredSession {
            session_id: session_id.to_string(),
            path: path.clone(),
            project: project.clone(),
            mtime,
        });
    }
    Ok(())
}

fn file_age_days(metadata: &std::fs::Metadata) -> i64 {
    let Ok(modified) = metadata.modified() else {
        return 0;
    };
    let age = std::time::SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    age.as_secs() as i64 / 86_400
}

/// RSS of the current process, in bytes. Grounded on the same `sysinfo`
/// dependency already used by [`crate::coordination::is_process_alive`].
fn current_rss_bytes() -> u64 {
    let mut system = sysinfo::System::new();
    let pid = sysinfo::Pid::from_u32(std::process::id());
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map_or(0, sysinfo::Process::memory)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_sessions_skips_node_modules_and_dot_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("root-session.jsonl"), "{}").unwrap();

        let proj = dir.path().join("my-project");
        std::fs::create_dir_all(&proj).unwrap();
        std::fs::write(proj.join("proj-session.jsonl"), "{}").unwrap();

        let skipped = dir.path().join("node_modules");
        std::fs::create_dir_all(&skipped).unwrap();
        std::fs::write(skipped.join("ignored.jsonl"), "{}").unwrap();

        let found = discover_sessions(dir.path()).unwrap();
        let ids: std::collections::HashSet<_> = found.iter().map(|s| s.session_id.as_str()).collect();
        assert!(ids.contains("root-session"));
        assert!(ids.contains("proj-session"));
        assert_eq!(found.len(), 2);
    }
}
