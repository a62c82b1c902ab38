//! The backing daemon process (`rclone rcd`).

use crate::config::OrchestratorSettings;
use crate::error::Result;
use crate::process::{LaunchPlan, Liveness, ProcessHandle, ProcessHealth, ProcessLauncher};
use crate::platform::ProcessSignal;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One run of the daemon.
#[derive(Debug)]
pub struct DaemonProcess {
    handle: ProcessHandle,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
}

impl DaemonProcess {
    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }
}

/// Owner of the single backing daemon process.
///
/// Tracked on its own rather than in a workload registry: there is exactly
/// one, and it is started before and stopped after every workload.
#[derive(Debug)]
pub struct BackingDaemon {
    plan: LaunchPlan,
    grace_period: Duration,
    stop_timeout: Duration,
    current: Mutex<Option<Arc<DaemonProcess>>>,
}

impl BackingDaemon {
    /// `rclone rcd --rc-addr <addr> --rc-no-auth` per `settings`.
    pub fn new(settings: &OrchestratorSettings) -> Self {
        let plan = LaunchPlan::new(&settings.rclone_binary, "rclone rcd").with_args([
            "rcd".to_string(),
            "--rc-addr".to_string(),
            listen_addr(&settings.rc_addr),
            "--rc-no-auth".to_string(),
        ]);
        Self::from_plan(
            plan,
            settings.supervisor.grace_period,
            settings.daemon_stop_timeout,
        )
    }

    pub fn from_plan(plan: LaunchPlan, grace_period: Duration, stop_timeout: Duration) -> Self {
        Self {
            plan,
            grace_period,
            stop_timeout,
            current: Mutex::new(None),
        }
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<DaemonProcess>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current run, if one was started and not yet stopped.
    pub fn current(&self) -> Option<Arc<DaemonProcess>> {
        self.slot().clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.current().map(|p| p.pid())
    }

    /// Whether the tracked process exists and has not exited.
    pub fn is_running(&self) -> bool {
        self.current()
            .is_some_and(|p| !p.handle.has_exited() && ProcessHealth::is_alive(p.pid()))
    }

    /// Liveness of the current run, `None` when nothing is tracked.
    pub fn liveness(&self, now: Instant) -> Option<Liveness> {
        let process = self.current()?;
        let past_grace = now.saturating_duration_since(process.started_at) >= self.grace_period;
        if process.handle.has_exited() && past_grace {
            return Some(Liveness::Dead);
        }
        Some(ProcessHealth::assess(
            process.pid(),
            process.started_at,
            self.grace_period,
            now,
        ))
    }

    /// Spawn the daemon unless a live run is already tracked. Returns its pid.
    pub fn start(&self) -> Result<u32> {
        let mut slot = self.slot();
        if let Some(process) = slot.as_ref() {
            if !process.handle.has_exited() {
                return Ok(process.pid());
            }
        }

        let handle = ProcessLauncher::spawn(&self.plan)?;
        let pid = handle.pid();
        *slot = Some(Arc::new(DaemonProcess {
            handle,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        }));
        info!("Started rclone rcd with PID {}", pid);
        Ok(pid)
    }

    /// SIGINT, wait, then SIGKILL. A no-op when nothing is tracked.
    pub async fn stop(&self) -> Result<()> {
        let Some(process) = self.slot().take() else {
            return Ok(());
        };

        let outcome = process
            .handle
            .terminate(ProcessSignal::Interrupt, self.stop_timeout)
            .await?;
        process.handle.join_reaper().await;
        info!("Stopped rclone rcd (pid {}): {}", process.pid(), outcome);
        Ok(())
    }

    /// Stop whatever is tracked and start a fresh run.
    pub async fn restart(&self) -> Result<u32> {
        if let Err(e) = self.stop().await {
            warn!("Stopping previous rclone rcd failed: {}", e);
        }
        self.start()
    }
}

/// `--rc-addr` value for a configured address, which may be a full URL.
fn listen_addr(rc_addr: &str) -> String {
    rc_addr
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/')
        .to_string()
}
