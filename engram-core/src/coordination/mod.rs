//! The cross-process coordination fabric (spec §4, "PID file, Unix-domain
//! socket, atomic state file, and advisory file locks").

pub mod file_lock;
pub mod pid_guard;
pub mod state_store;
pub mod uds;

pub use file_lock::FileLock;
pub use pid_guard::PidGuard;
pub use state_store::StateStore;
pub use uds::UdsServer;

/// `true` if a process with the given pid is currently alive. Grounded on
/// `memory-cli`'s existing `sysinfo` dependency rather than raw
/// `libc::kill` — `sysinfo` already distinguishes "no such process" from a
/// permission-denied probe on every platform the teacher targets.
#[must_use]
pub fn is_process_alive(pid: u32) -> ProcessLiveness {
    let mut system = sysinfo::System::new();
    let refreshed = system.refresh_processes(
        sysinfo::ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
    );
    if refreshed > 0 {
        ProcessLiveness::Alive
    } else {
        ProcessLiveness::Dead
    }
}

/// The outcomes of probing a pid's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLiveness {
    Alive,
    Dead,
}

impl ProcessLiveness {
    /// Whether the holder should be treated as "still running" for
    /// reclaim-decision purposes.
    #[must_use]
    pub fn blocks_reclaim(self) -> bool {
        matches!(self, ProcessLiveness::Alive)
    }
}
