//! Scoped advisory file lock with guaranteed release on every exit path
//! (spec §4.3).

use super::{is_process_alive, ProcessLiveness};
use crate::error::{EngramError, Result};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::sleep;

/// An acquired advisory lock. Dropping (or explicitly calling
/// [`FileLock::release`]) removes the lock file, but only if its contents
/// still match this acquisition's token — a lagging owner must never delete
/// a lock another process has since reclaimed.
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Acquires the lock at `path`, retrying every 50 ms until a 15-second
    /// deadline. If the deadline passes without success, reads the existing
    /// file: a live holder fails the acquisition outright; a dead or
    /// ancient holder is unlinked and the deadline resets.
    pub async fn acquire(path: &Path) -> Result<Self> {
        Self::acquire_with_deadline(path, crate::constants::coordination::LOCK_DEADLINE).await
    }

    /// As [`FileLock::acquire`], but with an overridable first-deadline —
    /// used by tests so a stale-reclaim scenario doesn't have to wait out
    /// the full production deadline.
    pub async fn acquire_with_deadline(
        path: &Path,
        initial_deadline: std::time::Duration,
    ) -> Result<Self> {
        let token = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
        let mut deadline = Instant::now() + initial_deadline;

        loop {
            match try_create(path, &token) {
                Ok(()) => {
                    return Ok(FileLock {
                        path: path.to_path_buf(),
                        token,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() < deadline {
                        sleep(crate::constants::coordination::LOCK_RETRY_INTERVAL).await;
                        continue;
                    }
                    if let Some(holder_pid) = read_holder_pid(path) {
                        if is_process_alive(holder_pid) == ProcessLiveness::Alive {
                            return Err(EngramError::LockContention(format!(
                                "lock {path:?} held by live process {holder_pid}"
                            )));
                        }
                    }
                    // Stale (dead holder, or unparsable contents): reclaim.
                    let _ = std::fs::remove_file(path);
                    deadline = Instant::now() + initial_deadline;
                }
                Err(e) => return Err(EngramError::Io(e)),
            }
        }
    }

    /// Releases the lock, removing the file only if its contents are still
    /// this acquisition's token.
    pub fn release(self) {
        // Drop does the work; this just makes the call site explicit.
        drop(self);
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Ok(mut f) = std::fs::File::open(&self.path) {
            let mut contents = String::new();
            if f.read_to_string(&mut contents).is_ok() && contents.trim() == self.token {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

fn try_create(path: &Path, token: &str) -> std::io::Result<()> {
    let mut f = OpenOptions::new().create_new(true).write(true).open(path)?;
    f.write_all(token.as_bytes())?;
    Ok(())
}

fn read_holder_pid(path: &Path) -> Option<u32> {
    let contents = std::fs::read_to_string(path).ok()?;
    let first = contents.split('-').next()?;
    first.parse().ok()
}

/// Runs `body` while holding the lock at `path`, releasing it on every exit
/// path including an error return from `body` (spec §8: `withFileLock`
/// never leaves the lock file on disk after it returns).
pub async fn with_file_lock<F, Fut, T>(path: &Path, body: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let lock = FileLock::acquire(path).await?;
    let result = body().await;
    lock.release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn acquire_and_release_leaves_no_file_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.lock");
        let out = with_file_lock(&path, || async { Ok(42) }).await.unwrap();
        assert_eq!(out, 42);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn acquire_and_release_leaves_no_file_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.lock");
        let out: Result<()> = with_file_lock(&path, || async {
            Err(EngramError::Invariant("boom".into()))
        })
        .await;
        assert!(out.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn reclaims_lock_held_by_dead_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.lock");
        // A pid astronomically unlikely to be alive on any test runner.
        std::fs::write(&path, "999999999-dead-owner").unwrap();
        let lock = FileLock::acquire_with_deadline(&path, std::time::Duration::from_millis(50))
            .await
            .unwrap();
        lock.release();
        assert!(!path.exists());
    }
}
