//! Single-instance guard with liveness + age-based reclaim (spec §4.5).

use super::{is_process_alive, ProcessLiveness};
use crate::error::{EngramError, Result};
use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

pub struct PidGuard {
    path: PathBuf,
}

impl PidGuard {
    /// Acquires the PID file at `path`, writing `pid\ncreated_at_ms\n`.
    ///
    /// If creation races with an existing holder, the holder is refused
    /// only when its process is alive AND its creation timestamp is within
    /// [`crate::constants::coordination::PID_MAX_AGE_DAYS`] — an ancient
    /// file survives pid reuse and must not block a fresh start. Up to
    /// [`crate::constants::coordination::PID_RECLAIM_ATTEMPTS`] reclaim
    /// attempts are made.
    pub fn acquire(path: &Path) -> Result<Self> {
        let now = chrono::Utc::now().timestamp_millis();
        for _ in 0..crate::constants::coordination::PID_RECLAIM_ATTEMPTS {
            match write_new(path, now) {
                Ok(()) => return Ok(PidGuard { path: path.to_path_buf() }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_existing(path) {
                        Some((holder_pid, created_at)) => {
                            let age_days = (now - created_at) / 86_400_000;
                            let alive = is_process_alive(holder_pid);
                            if alive == ProcessLiveness::Alive
                                && age_days < crate::constants::coordination::PID_MAX_AGE_DAYS
                            {
                                return Err(EngramError::LockContention(format!(
                                    "engramd already running as pid {holder_pid}"
                                )));
                            }
                            // Dead, or suspiciously ancient (pid-reuse risk): reclaim.
                            let _ = std::fs::remove_file(path);
                        }
                        None => {
                            // Unparsable contents: treat as corrupt and reclaim.
                            let _ = std::fs::remove_file(path);
                        }
                    }
                }
                Err(e) => return Err(EngramError::Io(e)),
            }
        }
        Err(EngramError::LockContention(
            "could not acquire pid file after retries".into(),
        ))
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn write_new(path: &Path, created_at_ms: i64) -> std::io::Result<()> {
    let mut f = OpenOptions::new().create_new(true).write(true).open(path)?;
    writeln!(f, "{}", std::process::id())?;
    writeln!(f, "{created_at_ms}")?;
    Ok(())
}

fn read_existing(path: &Path) -> Option<(u32, i64)> {
    let f = std::fs::File::open(path).ok()?;
    let mut lines = std::io::BufReader::new(f).lines();
    let pid: u32 = lines.next()?.ok()?.trim().parse().ok()?;
    let created_at: i64 = lines.next()?.ok()?.trim().parse().ok()?;
    Some((pid, created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_first_is_alive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engram.pid");
        let _guard = PidGuard::acquire(&path).unwrap();
        // Our own pid is alive by construction, so a second acquire must refuse.
        assert!(PidGuard::acquire(&path).is_err());
    }

    #[test]
    fn reclaims_after_stale_dead_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engram.pid");
        std::fs::write(&path, "999999999\n1\n").unwrap();
        let guard = PidGuard::acquire(&path).unwrap();
        drop(guard);
        assert!(!path.exists());
    }
}
