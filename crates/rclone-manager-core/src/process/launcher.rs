//! Process launching and the owned handle to a spawned child.

use super::environment::prepare_environment;
use crate::error::{ManagerError, Result};
use crate::platform::{self, ProcessSignal};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long to wait for the reaper after a SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Everything needed to spawn one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Overrides layered on top of the inherited environment.
    pub env_overrides: BTreeMap<String, String>,
    /// Label used in log lines (e.g. "mount b1").
    pub label: String,
}

impl LaunchPlan {
    pub fn new(program: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_overrides: BTreeMap::new(),
            label: label.into(),
        }
    }

    /// Add an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the environment overrides.
    pub fn with_env_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.env_overrides = overrides;
        self
    }
}

impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The reaper collected an exit status.
    Exited(ExitStatus),
    /// The exit status could not be collected.
    Unknown,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(status) if status.success())
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(status) => write!(f, "{}", status),
            ExitOutcome::Unknown => write!(f, "unknown exit status"),
        }
    }
}

/// Exclusive handle to a spawned child.
///
/// The child itself lives in a background reaper task that waits for its
/// exit, so exit is observed promptly without anyone polling. The handle
/// publishes that exit and can ask the reaper to kill the child. Dropping the
/// handle kills the child.
pub struct ProcessHandle {
    pid: u32,
    label: String,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("label", &self.label)
            .field("exit", &*self.exit_rx.borrow())
            .finish()
    }
}

impl ProcessHandle {
    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Label given at launch.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exit outcome if the reaper has already collected it.
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_outcome().is_some()
    }

    /// Wait up to `timeout` for the child to exit.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ExitOutcome> {
        let mut rx = self.exit_rx.clone();
        let waited = tokio::time::timeout(timeout, rx.wait_for(Option::is_some))
            .await
            .map(|result| result.map(|outcome| *outcome));
        match waited {
            Ok(Ok(outcome)) => outcome,
            // Reaper gone without publishing.
            Ok(Err(_)) => Some(self.exit_outcome().unwrap_or(ExitOutcome::Unknown)),
            Err(_) => None,
        }
    }

    /// Send `signal`, wait up to `timeout`, then kill.
    ///
    /// Returns immediately if the child already exited.
    pub async fn terminate(&self, signal: ProcessSignal, timeout: Duration) -> Result<ExitOutcome> {
        if let Some(outcome) = self.exit_outcome() {
            return Ok(outcome);
        }

        if let Err(e) = platform::signal_process(self.pid, signal) {
            warn!("{} (pid {}): {}; escalating to kill", self.label, self.pid, e);
        } else if let Some(outcome) = self.wait_for_exit(timeout).await {
            debug!("{} (pid {}) stopped: {}", self.label, self.pid, outcome);
            return Ok(outcome);
        } else {
            warn!(
                "{} (pid {}) still running {:?} after {:?}, killing",
                self.label, self.pid, timeout, signal
            );
        }

        self.request_kill();
        self.wait_for_exit(KILL_WAIT)
            .await
            .ok_or(ManagerError::Timeout(KILL_WAIT))
    }

    /// Ask the reaper to SIGKILL the child.
    pub fn request_kill(&self) {
        let sender = match self.kill_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }

    /// Wait for the reaper task itself to finish.
    pub async fn join_reaper(&self) {
        let handle = match self.reaper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Reaper for {} (pid {}) failed: {}", self.label, self.pid, e);
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.has_exited() {
            self.request_kill();
        }
    }
}

/// Spawns external commands for the supervisors and the backing daemon.
pub struct ProcessLauncher;

impl ProcessLauncher {
    /// Spawn `plan` in its own process group and start reaping it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(plan: &LaunchPlan) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .env_clear()
            .envs(prepare_environment(&plan.env_overrides))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // Keep terminal signals aimed at the manager away from the children;
        // they are stopped explicitly and in order.
        #[cfg(unix)]
        cmd.process_group(0);

        info!("Launching {}: {}", plan.label, plan);

        let child = cmd.spawn().map_err(|e| {
            error!("Failed to spawn {}: {}", plan.label, e);
            ManagerError::Io {
                message: format!("failed to spawn {}: {}", plan.program.display(), e),
                path: Some(plan.program.clone()),
                source: Some(e),
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| ManagerError::Other(format!("{} exited before reporting a pid", plan.label)))?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        let reaper = tokio::spawn(reap(child, plan.label.clone(), pid, kill_rx, exit_tx));

        debug!("Spawned {} with PID {}", plan.label, pid);

        Ok(ProcessHandle {
            pid,
            label: plan.label.clone(),
            exit_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
            reaper: Mutex::new(Some(reaper)),
        })
    }
}

async fn reap(
    mut child: Child,
    label: String,
    pid: u32,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit kill request and when the handle is dropped.
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill {} (pid {}): {}", label, pid, e);
            }
            child.wait().await
        }
    };

    let outcome = match status {
        Ok(status) if status.success() => {
            info!("{} (pid {}) exited cleanly", label, pid);
            ExitOutcome::Exited(status)
        }
        Ok(status) => {
            warn!("{} (pid {}) exited: {}", label, pid, status);
            ExitOutcome::Exited(status)
        }
        Err(e) => {
            warn!("Failed to wait on {} (pid {}): {}", label, pid, e);
            ExitOutcome::Unknown
        }
    };
    let _ = exit_tx.send(Some(outcome));
}
