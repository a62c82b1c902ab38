//! Background health monitoring.
//!
//! A [`HealthMonitor`] polls one supervisor's registry, leaves young
//! workloads alone, and hands dead ones back to the supervisor for
//! replacement. Each monitor runs as its own task with its own cancellation
//! token; [`MonitorHandle::stop`] cancels it and waits for it to finish.

use crate::cancel::{self, CancellationToken};
use crate::process::{Liveness, ProcessHealth};
use crate::supervisor::WorkloadSupervisor;
use crate::workload::WorkloadDriver;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Joinable handle to a background loop.
#[derive(Debug)]
pub struct MonitorHandle {
    name: String,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// Wrap a task that exits on its own once `token` is cancelled.
    pub(crate) fn from_task(name: String, token: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            name,
            token,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        match self.task.try_lock() {
            Ok(task) => task.as_ref().map_or(true, JoinHandle::is_finished),
            Err(_) => false,
        }
    }

    /// Cancel the loop and wait until it has exited.
    pub async fn stop(&self) {
        self.token.cancel();
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("{} ended abnormally: {}", self.name, e);
            }
        }
    }
}

/// Run `pass` every `interval` until `token` is cancelled.
///
/// A panic inside a pass is logged and ends the loop; it never reaches the
/// runtime.
pub(crate) fn spawn_loop<F, Fut>(
    name: String,
    interval: Duration,
    token: CancellationToken,
    mut pass: F,
) -> MonitorHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let loop_name = name.clone();
    let loop_token = token.clone();

    let task = tokio::spawn(async move {
        info!("Starting {}", loop_name);
        loop {
            if loop_token.is_cancelled() {
                break;
            }
            if let Err(panic) = AssertUnwindSafe(pass()).catch_unwind().await {
                error!("{} crashed: {}", loop_name, panic_message(&*panic));
                break;
            }
            if cancel::sleep(&loop_token, interval).await.is_err() {
                break;
            }
        }
        info!("Stopped {}", loop_name);
    });

    MonitorHandle::from_task(name, token, task)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub checked: usize,
    pub in_grace: usize,
    pub restarted: Vec<String>,
    pub failed: Vec<String>,
}

/// Health monitor for one kind.
pub struct HealthMonitor<D: WorkloadDriver> {
    supervisor: Arc<WorkloadSupervisor<D>>,
    token: CancellationToken,
}

impl<D: WorkloadDriver> HealthMonitor<D> {
    /// The monitor stops by itself when the supervisor's token is cancelled.
    pub fn new(supervisor: Arc<WorkloadSupervisor<D>>) -> Self {
        let token = supervisor.token().child_token();
        Self { supervisor, token }
    }

    /// Check every registered workload once and restart the dead ones.
    pub async fn run_pass(&self) -> PassReport {
        let kind = self.supervisor.kind();
        let mut report = PassReport::default();

        for (backend, workload) in self.supervisor.registry().snapshot() {
            if self.token.is_cancelled() {
                break;
            }
            report.checked += 1;

            let pid = workload.pid();
            let now = Instant::now();
            let liveness = if workload.handle().has_exited() && !workload.in_grace_period(now) {
                Liveness::Dead
            } else {
                ProcessHealth::assess(pid, workload.started_at(), workload.grace_period(), now)
            };
            drop(workload);

            match liveness {
                Liveness::InGracePeriod => {
                    debug!("Skipping {} {} (pid {}): within grace period", kind, backend, pid);
                    report.in_grace += 1;
                }
                Liveness::Alive => {}
                Liveness::Dead => {
                    warn!("{} {} (pid {}) died. Restarting...", kind, backend, pid);
                    match self.supervisor.replace_dead(&backend, pid).await {
                        Ok(Some(replacement)) => {
                            info!(
                                "Restarted {} {} with new PID {}",
                                kind,
                                backend,
                                replacement.pid()
                            );
                            report.restarted.push(backend);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!("Failed to restart {} {}: {}", kind, backend, e);
                            report.failed.push(backend);
                        }
                    }
                }
            }
        }

        report
    }

    /// Start polling at the supervisor's monitor interval.
    pub fn spawn(self) -> MonitorHandle {
        let interval = self.supervisor.settings().monitor_interval;
        let name = format!("{} health monitor", self.supervisor.kind());
        let token = self.token.clone();
        let monitor = Arc::new(self);

        spawn_loop(name, interval, token, move || {
            let monitor = Arc::clone(&monitor);
            async move {
                monitor.run_pass().await;
            }
        })
    }
}
