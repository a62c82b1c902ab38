//! Platform-specific process probing and signalling.

use crate::error::{ManagerError, Result};
use tracing::{debug, warn};

/// Signals the supervisor sends to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Graceful stop for workloads.
    Terminate,
    /// Graceful stop for the backing daemon (rclone unmounts on SIGINT).
    Interrupt,
    /// Forceful stop.
    Kill,
}

/// Check if a process with the given PID is alive.
///
/// First sends signal 0. If that reports the process as gone, the `/proc`
/// entry is consulted before agreeing, so a probe racing the exit of a
/// process never yields a false "dead". Anything ambiguous counts as alive.
///
/// # Platform Behavior
/// - **Linux**: `kill(pid, 0)` then `/proc/<pid>`
/// - **Other Unix**: `kill(pid, 0)` only
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;

        let Some(nix_pid) = to_nix_pid(pid) else {
            return false;
        };

        match kill(nix_pid, None) {
            Ok(()) => true,
            // Exists, owned by someone else.
            Err(Errno::EPERM) => true,
            Err(Errno::ESRCH) => proc_entry_exists(pid),
            Err(e) => {
                debug!("Liveness probe for {} inconclusive: {}", pid, e);
                proc_entry_exists(pid) || !cfg!(target_os = "linux")
            }
        }
    }

    #[cfg(not(unix))]
    {
        warn!("Process alive check not implemented for this platform");
        let _ = pid;
        true
    }
}

#[cfg(target_os = "linux")]
fn proc_entry_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn proc_entry_exists(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn to_nix_pid(pid: u32) -> Option<nix::unistd::Pid> {
    // 0 and anything above i32::MAX would address process groups.
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}

/// Deliver a signal to a single process.
///
/// A process that no longer exists is not an error.
pub fn signal_process(pid: u32, signal: ProcessSignal) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};

        let nix_pid = to_nix_pid(pid).ok_or_else(|| ManagerError::Signal {
            pid,
            message: "invalid pid".to_string(),
        })?;
        let sig = match signal {
            ProcessSignal::Terminate => Signal::SIGTERM,
            ProcessSignal::Interrupt => Signal::SIGINT,
            ProcessSignal::Kill => Signal::SIGKILL,
        };

        debug!("Sending {:?} to process {}", sig, pid);
        match kill(nix_pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => {
                warn!("Failed to send {:?} to {}: {}", sig, pid, e);
                Err(ManagerError::Signal {
                    pid,
                    message: e.to_string(),
                })
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal;
        Err(ManagerError::Signal {
            pid,
            message: "signals are not supported on this platform".to_string(),
        })
    }
}
