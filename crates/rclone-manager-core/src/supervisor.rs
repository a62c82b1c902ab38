//! Start/stop/restart state machine for workloads of one kind.
//!
//! One [`WorkloadSupervisor`] exists per kind. It owns that kind's registry
//! and is the only code that registers or unregisters entries in it. Every
//! mutation happens under the coordination lock shared with the other
//! supervisor and the reconciler; the `*_locked` variants take the guard as
//! proof that the caller already holds it.

use crate::cancel::CancellationToken;
use crate::config::SupervisorSettings;
use crate::error::{ManagerError, Result};
use crate::platform::ProcessSignal;
use crate::process::{ProcessHandle, ProcessLauncher};
use crate::registry::WorkloadRegistry;
use crate::retry::{retry_with_cancel, RetryPolicy};
use crate::workload::{Workload, WorkloadDriver, WorkloadKind, WorkloadSpec, WorkloadStatus};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Lock linearizing every registry mutation across both kinds.
pub type CoordinationLock = Arc<Mutex<()>>;

/// Proof of holding the [`CoordinationLock`].
pub type CoordinationGuard<'a> = MutexGuard<'a, ()>;

/// Create a fresh coordination lock.
pub fn coordination_lock() -> CoordinationLock {
    Arc::new(Mutex::new(()))
}

/// Supervises every workload of one kind.
pub struct WorkloadSupervisor<D: WorkloadDriver> {
    driver: D,
    registry: WorkloadRegistry<Workload<D::Spec>>,
    settings: SupervisorSettings,
    lock: CoordinationLock,
    token: CancellationToken,
}

impl<D: WorkloadDriver> WorkloadSupervisor<D> {
    /// `token` aborts pending start retries when cancelled.
    pub fn new(
        driver: D,
        settings: SupervisorSettings,
        lock: CoordinationLock,
        token: CancellationToken,
    ) -> Self {
        Self {
            driver,
            registry: WorkloadRegistry::new(),
            settings,
            lock,
            token,
        }
    }

    pub fn kind(&self) -> WorkloadKind {
        self.driver.kind()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn registry(&self) -> &WorkloadRegistry<Workload<D::Spec>> {
        &self.registry
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Acquire the coordination lock.
    pub async fn lock(&self) -> CoordinationGuard<'_> {
        self.lock.lock().await
    }

    pub fn get(&self, backend: &str) -> Option<Arc<Workload<D::Spec>>> {
        self.registry.get(backend)
    }

    /// Status of every registered workload, ordered by backend.
    pub fn status(&self) -> Vec<WorkloadStatus> {
        let mut status: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(_, workload)| workload.status())
            .collect();
        status.sort_by(|a, b| a.backend.cmp(&b.backend));
        status
    }

    /// Launch `spec`, retrying on failure, and register the result.
    pub async fn start_with_retries(&self, spec: D::Spec) -> Result<Arc<Workload<D::Spec>>> {
        let guard = self.lock().await;
        self.start_with_retries_locked(&guard, spec).await
    }

    /// [`start_with_retries`](Self::start_with_retries) for callers holding the lock.
    ///
    /// An entry already registered under the same identity is stopped first,
    /// so one identity never owns two processes. After the last failed
    /// attempt nothing is registered.
    pub async fn start_with_retries_locked(
        &self,
        guard: &CoordinationGuard<'_>,
        spec: D::Spec,
    ) -> Result<Arc<Workload<D::Spec>>> {
        let id = spec.id();

        if self.registry.contains(spec.backend_name()) {
            warn!("{} is already running; stopping it before starting again", id);
            self.stop_locked(guard, spec.backend_name()).await;
        }

        let policy = RetryPolicy::new(self.settings.max_start_attempts, self.settings.retry_delay);
        let label = id.to_string();
        let (result, stats) = retry_with_cancel(
            &policy,
            &self.token,
            &label,
            |attempt| self.launch_once(&spec, attempt),
            ManagerError::is_retryable,
        )
        .await;

        let handle = match result {
            Ok(handle) => handle,
            Err(ManagerError::Cancelled) => {
                info!("Start of {} abandoned: shutting down", id);
                return Err(ManagerError::Cancelled);
            }
            Err(e) => {
                let err = ManagerError::RetriesExhausted {
                    kind: self.kind(),
                    backend: spec.backend_name().to_string(),
                    attempts: stats.attempts,
                    last_error: e.to_string(),
                };
                error!("{}", err);
                return Err(err);
            }
        };

        let workload = Arc::new(Workload::new(spec, handle, self.settings.grace_period));
        if let Some(previous) = self.registry.put(id.backend.clone(), Arc::clone(&workload)) {
            // Only reachable if a caller bypassed the lock.
            warn!("{} replaced an untracked entry (pid {})", id, previous.pid());
            self.terminate(&previous).await;
        }

        info!(
            "Started {} ({}) with PID {}",
            id,
            workload.spec().destination(),
            workload.pid()
        );
        Ok(workload)
    }

    async fn launch_once(&self, spec: &D::Spec, attempt: u32) -> Result<ProcessHandle> {
        debug!(
            "Starting {} (attempt {}/{})",
            spec.id(),
            attempt,
            self.settings.max_start_attempts
        );

        self.driver.prepare(spec).await?;
        let plan = self.driver.launch_plan(spec)?;
        let launch_failed = |message: String| ManagerError::LaunchFailed {
            kind: self.kind(),
            backend: spec.backend_name().to_string(),
            message,
        };

        let handle = ProcessLauncher::spawn(&plan).map_err(|e| launch_failed(e.to_string()))?;

        // A process that dies straight away (bad remote, port in use, ...)
        // is a failed launch, not a crash for the monitor to chase.
        if let Some(outcome) = handle.wait_for_exit(self.settings.launch_settle).await {
            return Err(launch_failed(format!("exited immediately: {}", outcome)));
        }
        Ok(handle)
    }

    /// Tear down and unregister `backend`. Returns whether anything was running.
    pub async fn stop(&self, backend: &str) -> bool {
        let guard = self.lock().await;
        self.stop_locked(&guard, backend).await
    }

    /// [`stop`](Self::stop) for callers holding the lock.
    ///
    /// Teardown failures are logged; the process is terminated and the entry
    /// removed regardless.
    pub async fn stop_locked(&self, _guard: &CoordinationGuard<'_>, backend: &str) -> bool {
        let Some(workload) = self.registry.get(backend) else {
            debug!("{} {} is not running; nothing to stop", self.kind(), backend);
            return false;
        };

        let id = workload.id();
        info!("Stopping {} (pid {})", id, workload.pid());

        if let Err(e) = self.driver.teardown(workload.spec()).await {
            warn!("Teardown of {} failed: {}", id, e);
        }
        self.terminate(&workload).await;

        let pid = workload.pid();
        self.registry.remove_if(backend, |current| current.pid() == pid);
        info!("Stopped {}", id);
        true
    }

    /// Stop every registered workload of this kind.
    ///
    /// Returns the number stopped. Failures are logged per workload.
    pub async fn stop_all(&self) -> usize {
        let guard = self.lock().await;
        self.stop_all_locked(&guard).await
    }

    pub async fn stop_all_locked(&self, guard: &CoordinationGuard<'_>) -> usize {
        let mut stopped = 0;
        for backend in self.registry.ids() {
            if self.stop_locked(guard, &backend).await {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!("Stopped {} {} workload(s)", stopped, self.kind());
        }
        stopped
    }

    /// Replace a workload the monitor found dead.
    ///
    /// Nothing happens (`Ok(None)`) if the registry no longer holds the dead
    /// process under `backend`, i.e. a reconcile stopped or replaced it after
    /// the monitor looked. Otherwise the endpoint is torn down best-effort,
    /// the entry is dropped and the same spec started again.
    pub async fn replace_dead(
        &self,
        backend: &str,
        dead_pid: u32,
    ) -> Result<Option<Arc<Workload<D::Spec>>>> {
        // A shutdown holding the lock must not wait on a monitor waiting here.
        let guard = tokio::select! {
            guard = self.lock() => guard,
            _ = self.token.cancelled() => return Err(ManagerError::Cancelled),
        };
        if self.token.is_cancelled() {
            return Err(ManagerError::Cancelled);
        }

        let workload = match self.registry.get(backend) {
            Some(w) if w.pid() == dead_pid => w,
            _ => {
                debug!(
                    "{} {} (pid {}) was already replaced; skipping restart",
                    self.kind(),
                    backend,
                    dead_pid
                );
                return Ok(None);
            }
        };

        let id = workload.id();
        if let Err(e) = self.driver.teardown(workload.spec()).await {
            warn!("Cleanup of dead {} failed: {}", id, e);
        }
        self.terminate(&workload).await;
        self.registry.remove_if(backend, |current| current.pid() == dead_pid);

        let spec = workload.spec().clone();
        drop(workload);
        self.start_with_retries_locked(&guard, spec).await.map(Some)
    }

    async fn terminate(&self, workload: &Workload<D::Spec>) {
        let handle = workload.handle();
        match handle
            .terminate(ProcessSignal::Terminate, self.settings.stop_timeout)
            .await
        {
            Ok(outcome) => debug!("{} (pid {}) ended: {}", workload.id(), handle.pid(), outcome),
            Err(e) => warn!("Failed to terminate {} (pid {}): {}", workload.id(), handle.pid(), e),
        }
        handle.join_reaper().await;
    }
}
