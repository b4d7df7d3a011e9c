//! Periodic graduation and compression passes over the episode table, run
//! under an advisory lock on a 4-hour interval (spec §4.10).

use crate::constants::lifecycle;
use crate::coordination::FileLock;
use crate::error::{EngramError, Result};
use crate::store::{queries, Store};
use crate::types::Episode;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Runs the graduation and compression passes.
pub struct Consolidator {
    store: Arc<Store>,
    lock_path: PathBuf,
    memory_dir: PathBuf,
}

impl Consolidator {
    /// `memory_dir` is the root under which per-project (and the global)
    /// `MEMORY.md` files are written, e.g. `<project>/.claude/memory/`.
    #[must_use]
    pub fn new(store: Arc<Store>, lock_path: PathBuf, memory_dir: PathBuf) -> Self {
        Consolidator {
            store,
            lock_path,
            memory_dir,
        }
    }

    /// Runs one consolidation cycle under the advisory lock. Both passes
    /// tolerate concurrent inserts: they read a bounded batch, decide, and
    /// write with prepared statements rather than locking the whole table.
    pub async fn run(&self, now_ms: i64) -> Result<()> {
        let lock = FileLock::acquire(&self.lock_path).await?;
        let result = self.run_locked(now_ms).await;
        lock.release();
        result
    }

    async fn run_locked(&self, now_ms: i64) -> Result<()> {
        self.graduate(now_ms).await?;
        self.compress(now_ms).await?;
        Ok(())
    }

    async fn graduate(&self, now_ms: i64) -> Result<()> {
        let conn = self.store.connection();
        let candidates = queries::graduation_candidates(
            conn,
            now_ms,
            lifecycle::GRADUATION_MIN_ACCESS_COUNT,
            lifecycle::GRADUATION_MIN_AGE_DAYS,
            lifecycle::MAX_GRADUATIONS_PER_CYCLE,
        )
        .await?;

        for episode in &candidates {
            self.append_to_memory_file(episode)?;
            queries::set_graduated(conn, &episode.id, now_ms).await?;
        }
        Ok(())
    }

    async fn compress(&self, now_ms: i64) -> Result<()> {
        let conn = self.store.connection();
        let candidates = queries::compression_candidates(
            conn,
            now_ms,
            lifecycle::COMPRESSION_AGE_DAYS,
            lifecycle::MAX_GRADUATIONS_PER_CYCLE * 10,
        )
        .await?;

        for episode in &candidates {
            queries::compress_episode(conn, &episode.id).await?;
        }
        Ok(())
    }

    /// Appends one bullet line to the project's (or global) `MEMORY.md`.
    fn append_to_memory_file(&self, episode: &Episode) -> Result<()> {
        let path = self.memory_file_path(episode.project.as_deref());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(EngramError::Io)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(EngramError::Io)?;
        writeln!(f, "- {}", episode.summary).map_err(EngramError::Io)?;
        Ok(())
    }

    fn memory_file_path(&self, project: Option<&str>) -> PathBuf {
        match project {
            Some(p) => self.memory_dir.join(p).join(".claude/memory/MEMORY.md"),
            None => self.memory_dir.join("MEMORY.md"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn graduates_and_compresses_without_touching_ineligible_rows() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("engram.db")).await.unwrap());
        let conn = store.connection();

        let now = 10_000_000_000_i64;
        let old_enough = now - lifecycle::GRADUATION_MIN_AGE_DAYS * 86_400_000 - 1;

        let graduate_me = Episode {
            id: Episode::new_id(),
            session_id: "s1".into(),
            project: None,
            scope: crate::types::Layer::Global,
            summary: "learned something important".into(),
            entities: vec![],
            importance: crate::types::Importance::High,
            source_type: "extraction".into(),
            full_content: Some("details".into()),
            embedding: None,
            created_at: old_enough,
            accessed_at: old_enough,
            access_count: 5,
            graduated_at: None,
        };
        queries::insert_episode(conn, &graduate_me).await.unwrap();

        let compress_me = Episode {
            id: Episode::new_id(),
            session_id: "s1".into(),
            project: None,
            scope: crate::types::Layer::Global,
            summary: "stale note".into(),
            entities: vec![],
            importance: crate::types::Importance::Normal,
            source_type: "extraction".into(),
            full_content: Some("stale details".into()),
            embedding: None,
            created_at: now - lifecycle::COMPRESSION_AGE_DAYS * 86_400_000 - 1,
            accessed_at: now - lifecycle::COMPRESSION_AGE_DAYS * 86_400_000 - 1,
            access_count: 0,
            graduated_at: None,
        };
        queries::insert_episode(conn, &compress_me).await.unwrap();

        let consolidator = Consolidator::new(
            Arc::clone(&store),
            dir.path().join("consolidate.lock"),
            dir.path().join("memories"),
        );
        consolidator.run(now).await.unwrap();

        let graduated = queries::get_episode(conn, &graduate_me.id).await.unwrap().unwrap();
        assert!(graduated.graduated_at.is_some());

        let compressed = queries::get_episode(conn, &compress_me.id).await.unwrap().unwrap();
        assert!(compressed.full_content.is_none());

        let memory_md = std::fs::read_to_string(dir.path().join("memories/MEMORY.md")).unwrap();
        assert!(memory_md.contains("learned something important"));
    }
}
