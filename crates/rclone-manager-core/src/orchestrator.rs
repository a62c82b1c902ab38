//! Top-level lifecycle: startup, live reconfiguration and ordered shutdown.
//!
//! The [`Orchestrator`] owns the backing daemon, both supervisors and every
//! background task. Startup is linear:
//!
//! ```text
//! clean stale mounts -> start rclone rcd -> wait ready -> fetch options
//!     -> build supervisors -> reconcile -> spawn monitors + watchdog
//! ```
//!
//! Every step that spawns something runs under the coordination lock after a
//! cancellation check, and [`Orchestrator::shutdown`] cancels first and takes
//! the lock second. A shutdown racing startup therefore either sees what
//! startup spawned or prevents it from being spawned.

use crate::cancel::{self, CancellationToken};
use crate::config::{DaemonConfig, OrchestratorSettings};
use crate::daemon::{self, BackingDaemon, DaemonControl, DaemonWatchdog, RcClient, StaleMountSource};
use crate::error::{ManagerError, Result};
use crate::manifest::{ConfigSource, DesiredState};
use crate::monitor::{HealthMonitor, MonitorHandle};
use crate::options::SharedEnvironmentContext;
use crate::platform;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::retry::RetryPolicy;
use crate::supervisor::{coordination_lock, CoordinationGuard, CoordinationLock, WorkloadSupervisor};
use crate::workload::{MountDriver, ServeDriver, WorkloadStatus};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Lifecycle phase of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Created,
    CleaningStaleState,
    StartingDaemon,
    WaitingReady,
    FetchingContext,
    StartingSupervisors,
    Running,
    ShuttingDown,
    Stopped,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::ShuttingDown | Phase::Stopped)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "created",
            Phase::CleaningStaleState => "cleaning stale state",
            Phase::StartingDaemon => "starting daemon",
            Phase::WaitingReady => "waiting for daemon",
            Phase::FetchingContext => "fetching options",
            Phase::StartingSupervisors => "starting supervisors",
            Phase::Running => "running",
            Phase::ShuttingDown => "shutting down",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Per-kind results of one reconcile. `None` when startup has not yet
/// built the supervisors; the desired state is then applied by startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub mounts: Option<ReconcileReport>,
    pub serves: Option<ReconcileReport>,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        self.mounts.as_ref().is_some_and(ReconcileReport::changed)
            || self.serves.as_ref().is_some_and(ReconcileReport::changed)
    }
}

/// Serializable snapshot of everything the orchestrator runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub phase: Phase,
    pub daemon_pid: Option<u32>,
    pub mounts: Vec<WorkloadStatus>,
    pub serves: Vec<WorkloadStatus>,
}

struct Supervisors {
    mounts: Arc<WorkloadSupervisor<MountDriver>>,
    serves: Arc<WorkloadSupervisor<ServeDriver>>,
}

/// Owns the backing daemon, the supervisors and their background tasks.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    control: Arc<dyn DaemonControl>,
    daemon: Arc<BackingDaemon>,
    lock: CoordinationLock,
    token: CancellationToken,
    phase: watch::Sender<Phase>,
    desired: Arc<Mutex<DesiredState>>,
    supervisors: OnceLock<Supervisors>,
    background: tokio::sync::Mutex<Vec<MonitorHandle>>,
    shut_down: tokio::sync::Mutex<bool>,
}

impl Orchestrator {
    /// Orchestrator talking to the rc API at `settings.rc_addr`.
    pub fn new(settings: OrchestratorSettings) -> Result<Self> {
        let control = RcClient::with_timeout(&settings.rc_url(), DaemonConfig::REQUEST_TIMEOUT)?;
        Ok(Self::with_control(settings, Arc::new(control)))
    }

    /// Orchestrator using a caller-supplied control surface.
    pub fn with_control(settings: OrchestratorSettings, control: Arc<dyn DaemonControl>) -> Self {
        let daemon = Arc::new(BackingDaemon::new(&settings));
        let (phase, _) = watch::channel(Phase::Created);
        Self {
            settings,
            control,
            daemon,
            lock: coordination_lock(),
            token: CancellationToken::new(),
            phase,
            desired: Arc::new(Mutex::new(DesiredState::default())),
            supervisors: OnceLock::new(),
            background: tokio::sync::Mutex::new(Vec::new()),
            shut_down: tokio::sync::Mutex::new(false),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Receiver notified on every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn daemon(&self) -> &BackingDaemon {
        &self.daemon
    }

    /// Mount supervisor, once startup has built it.
    pub fn mount_supervisor(&self) -> Option<&Arc<WorkloadSupervisor<MountDriver>>> {
        self.supervisors.get().map(|s| &s.mounts)
    }

    /// Serve supervisor, once startup has built it.
    pub fn serve_supervisor(&self) -> Option<&Arc<WorkloadSupervisor<ServeDriver>>> {
        self.supervisors.get().map(|s| &s.serves)
    }

    /// Latest accepted desired state.
    pub fn desired_state(&self) -> DesiredState {
        self.desired_slot().clone()
    }

    fn desired_slot(&self) -> MutexGuard<'_, DesiredState> {
        self.desired.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, next: Phase) {
        // Once shutdown has begun, startup can no longer move the phase.
        self.phase.send_if_modified(|current| {
            if *current == next || (current.is_terminal() && !next.is_terminal()) {
                return false;
            }
            debug!("Phase: {} -> {}", current, next);
            *current = next;
            true
        });
    }

    /// Take the coordination lock unless shutdown has begun.
    async fn lock_or_cancel(&self) -> Result<CoordinationGuard<'_>> {
        let guard = tokio::select! {
            guard = self.lock.lock() => guard,
            _ = self.token.cancelled() => return Err(ManagerError::Cancelled),
        };
        if self.token.is_cancelled() {
            return Err(ManagerError::Cancelled);
        }
        Ok(guard)
    }

    /// Bring the daemon up and converge on `desired`.
    ///
    /// Fails with [`ManagerError::DaemonNotReady`] when the daemon never
    /// answers, and with [`ManagerError::Cancelled`] when shutdown started
    /// first. Either way the caller should still call [`shutdown`](Self::shutdown).
    pub async fn initialize(&self, desired: DesiredState) -> Result<()> {
        desired.validate()?;
        if self.supervisors.get().is_some() {
            return Err(ManagerError::Other("orchestrator is already initialized".into()));
        }
        cancel::check(&self.token)?;

        if desired.is_empty() {
            warn!("No mounts or serves configured; running rclone rcd only");
        }
        info!(
            "Starting with {} mount(s) and {} serve(s)",
            desired.mounts.len(),
            desired.serves.len()
        );
        let stale = desired.mount_points();
        *self.desired_slot() = desired;

        self.set_phase(Phase::CleaningStaleState);
        release_mounts(&stale).await;

        self.set_phase(Phase::StartingDaemon);
        {
            let _guard = self.lock_or_cancel().await?;
            self.daemon.start()?;
        }

        self.set_phase(Phase::WaitingReady);
        let policy = RetryPolicy::new(self.settings.ready_attempts, self.settings.ready_interval);
        daemon::wait_ready(self.control.as_ref(), &policy, &self.token).await?;

        self.set_phase(Phase::FetchingContext);
        let context = match self.control.options().await {
            Ok(options) => SharedEnvironmentContext::from_options_json(&options),
            Err(e) => {
                warn!("Could not fetch rclone options, using no baseline: {}", e);
                SharedEnvironmentContext::empty()
            }
        };
        debug!("Shared option context: {:?}", context);

        self.set_phase(Phase::StartingSupervisors);
        let guard = self.lock_or_cancel().await?;
        let supervisors = self.build_supervisors(Arc::new(context));
        let mounts = Arc::clone(&supervisors.mounts);
        let serves = Arc::clone(&supervisors.serves);
        if self.supervisors.set(supervisors).is_err() {
            return Err(ManagerError::Other("orchestrator is already initialized".into()));
        }

        // Reconciles that arrived during startup only stored their state.
        let desired = self.desired_state();
        let mount_report = Reconciler::reconcile_locked(&mounts, &guard, &desired.mounts).await;
        let serve_report = Reconciler::reconcile_locked(&serves, &guard, &desired.serves).await;
        if mount_report.cancelled || serve_report.cancelled {
            return Err(ManagerError::Cancelled);
        }
        for backend in mount_report.failed.iter() {
            error!("mount {} did not start; the next reload will retry it", backend);
        }
        for backend in serve_report.failed.iter() {
            error!("serve {} did not start; the next reload will retry it", backend);
        }

        let mut background = self.background.lock().await;
        background.push(HealthMonitor::new(Arc::clone(&mounts)).spawn());
        background.push(HealthMonitor::new(Arc::clone(&serves)).spawn());
        background.push(
            DaemonWatchdog::new(
                Arc::clone(&self.daemon),
                self.stale_mount_source(Arc::clone(&mounts)),
                self.settings.supervisor.monitor_interval,
                &self.token,
            )
            .spawn(),
        );
        drop(background);
        drop(guard);

        self.set_phase(Phase::Running);
        info!(
            "rclone manager running: {} mount(s), {} serve(s)",
            mounts.registry().len(),
            serves.registry().len()
        );
        Ok(())
    }

    fn build_supervisors(&self, context: Arc<SharedEnvironmentContext>) -> Supervisors {
        let binary = &self.settings.rclone_binary;
        let mounts = WorkloadSupervisor::new(
            MountDriver::new(binary, context),
            self.settings.supervisor.clone(),
            Arc::clone(&self.lock),
            self.token.clone(),
        );
        let serves = WorkloadSupervisor::new(
            ServeDriver::new(binary),
            self.settings.supervisor.clone(),
            Arc::clone(&self.lock),
            self.token.clone(),
        );
        Supervisors {
            mounts: Arc::new(mounts),
            serves: Arc::new(serves),
        }
    }

    /// Desired mount points that have no live mount process.
    ///
    /// Mounts still served by their own process survive a daemon restart and
    /// are left alone.
    fn stale_mount_source(&self, mounts: Arc<WorkloadSupervisor<MountDriver>>) -> StaleMountSource {
        let desired = Arc::clone(&self.desired);
        Arc::new(move || {
            let state = desired.lock().unwrap_or_else(|e| e.into_inner());
            state
                .mounts
                .iter()
                .filter(|spec| match mounts.get(&spec.backend_name) {
                    Some(workload) => {
                        workload.handle().has_exited()
                            || workload.spec().mount_point != spec.mount_point
                    }
                    None => true,
                })
                .map(|spec| spec.mount_point.clone())
                .collect()
        })
    }

    /// Converge both kinds on `desired`.
    ///
    /// An invalid document is rejected before anything changes. Before
    /// startup has built the supervisors the state is only stored.
    pub async fn reconcile(&self, desired: DesiredState) -> Result<ReconcileOutcome> {
        desired.validate()?;
        let guard = self.lock_or_cancel().await?;
        *self.desired_slot() = desired.clone();

        let Some(supervisors) = self.supervisors.get() else {
            debug!("Supervisors not started yet; desired state stored for startup");
            return Ok(ReconcileOutcome::default());
        };

        info!(
            "Reconciling {} mount(s) and {} serve(s)",
            desired.mounts.len(),
            desired.serves.len()
        );
        let mounts = Reconciler::reconcile_locked(&supervisors.mounts, &guard, &desired.mounts).await;
        let serves = Reconciler::reconcile_locked(&supervisors.serves, &guard, &desired.serves).await;
        drop(guard);

        if mounts.cancelled || serves.cancelled {
            return Err(ManagerError::Cancelled);
        }
        if let Ok(status) = serde_json::to_string(&self.status()) {
            debug!("Status after reconcile: {}", status);
        }
        Ok(ReconcileOutcome {
            mounts: Some(mounts),
            serves: Some(serves),
        })
    }

    /// Load from `source` and reconcile. A load failure leaves everything running as is.
    pub async fn reload(&self, source: &dyn ConfigSource) -> Result<ReconcileOutcome> {
        info!("Reloading configuration from {}", source.describe());
        let desired = source.load().await.map_err(|e| {
            warn!(
                "Ignoring invalid configuration from {}: {}; keeping current state",
                source.describe(),
                e
            );
            e
        })?;
        let outcome = self.reconcile(desired).await?;
        info!("Configuration reload finished");
        Ok(outcome)
    }

    /// Reload from `source` every time `changes` yields, until shutdown.
    ///
    /// Notifications that pile up while a reload runs collapse into one.
    pub async fn spawn_reconfiguration_trigger(
        self: &Arc<Self>,
        source: Arc<dyn ConfigSource>,
        mut changes: mpsc::Receiver<()>,
    ) {
        let mut background = self.background.lock().await;
        if self.token.is_cancelled() {
            debug!("Shutdown in progress; not starting the reconfiguration trigger");
            return;
        }

        let token = self.token.child_token();
        let task_token = token.clone();
        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            info!("Watching {} for changes", source.describe());
            loop {
                let next = tokio::select! {
                    next = changes.recv() => next,
                    _ = task_token.cancelled() => None,
                };
                if next.is_none() {
                    break;
                }
                while changes.try_recv().is_ok() {}

                match orchestrator.reload(source.as_ref()).await {
                    Ok(_) | Err(ManagerError::Cancelled) => {}
                    Err(e) => warn!("Reload failed: {}", e),
                }
            }
            info!("Stopped reconfiguration trigger");
        });

        background.push(MonitorHandle::from_task(
            "reconfiguration trigger".to_string(),
            token,
            task,
        ));
    }

    /// Stop everything in order. Safe to call at any point, and more than once.
    ///
    /// Pending readiness waits and start retries are cancelled, background
    /// tasks are joined, serves then mounts are stopped, leftover mounts are
    /// released and the daemon is stopped last.
    pub async fn shutdown(&self) {
        let mut shut_down = self.shut_down.lock().await;
        if *shut_down {
            debug!("Shutdown already completed");
            return;
        }

        info!("Shutting down (phase: {})", self.phase());
        self.set_phase(Phase::ShuttingDown);
        self.token.cancel();

        let guard = self.lock.lock().await;

        let background: Vec<MonitorHandle> = self.background.lock().await.drain(..).collect();
        for handle in &background {
            debug!("Stopping {}", handle.name());
            handle.stop().await;
        }

        if let Some(supervisors) = self.supervisors.get() {
            supervisors.serves.stop_all_locked(&guard).await;
            supervisors.mounts.stop_all_locked(&guard).await;
        }

        // Mount points whose process was never tracked, or did not release
        // them when stopped.
        release_mounts(&self.desired_state().mount_points()).await;

        if let Err(e) = self.daemon.stop().await {
            warn!("Failed to stop rclone rcd: {}", e);
        }
        drop(guard);

        *shut_down = true;
        self.set_phase(Phase::Stopped);
        info!("Shutdown complete");
    }

    pub fn status(&self) -> OrchestratorStatus {
        let (mounts, serves) = match self.supervisors.get() {
            Some(s) => (s.mounts.status(), s.serves.status()),
            None => (Vec::new(), Vec::new()),
        };
        OrchestratorStatus {
            phase: self.phase(),
            daemon_pid: self.daemon.pid(),
            mounts,
            serves,
        }
    }
}

/// Lazily unmount every path that is still in the mount table.
async fn release_mounts(mount_points: &[PathBuf]) {
    for mount_point in mount_points {
        if !platform::is_mounted(mount_point).await {
            continue;
        }
        if let Err(e) = platform::force_unmount(mount_point).await {
            warn!("Failed to release {}: {}", mount_point.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display_and_serde() {
        assert_eq!(Phase::WaitingReady.to_string(), "waiting for daemon");
        assert_eq!(
            serde_json::to_string(&Phase::StartingSupervisors).unwrap(),
            "\"starting_supervisors\""
        );
    }

    #[test]
    fn test_phase_cannot_leave_shutdown() {
        let orchestrator = Orchestrator::with_control(
            OrchestratorSettings::default(),
            Arc::new(crate::daemon::RcClient::new("http://127.0.0.1:1/").unwrap()),
        );
        orchestrator.set_phase(Phase::WaitingReady);
        assert_eq!(orchestrator.phase(), Phase::WaitingReady);

        orchestrator.set_phase(Phase::ShuttingDown);
        orchestrator.set_phase(Phase::Running);
        assert_eq!(orchestrator.phase(), Phase::ShuttingDown);

        orchestrator.set_phase(Phase::Stopped);
        assert_eq!(orchestrator.phase(), Phase::Stopped);
    }

    #[test]
    fn test_outcome_changed() {
        assert!(!ReconcileOutcome::default().changed());
    }

    #[tokio::test]
    async fn test_reconcile_before_startup_only_stores() {
        let orchestrator = Orchestrator::with_control(
            OrchestratorSettings::default(),
            Arc::new(crate::daemon::RcClient::new("http://127.0.0.1:1/").unwrap()),
        );
        let desired = DesiredState::new(
            Vec::new(),
            vec![crate::workload::ServeSpec::new("b1", "webdav", ":8080")],
        );

        let outcome = orchestrator.reconcile(desired.clone()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(orchestrator.desired_state(), desired);
        assert!(orchestrator.status().serves.is_empty());
    }
}
