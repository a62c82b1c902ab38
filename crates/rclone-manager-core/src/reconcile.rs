//! Converging running workloads onto a desired-state snapshot.

use crate::error::ManagerError;
use crate::manifest::dedup_by_backend;
use crate::supervisor::{CoordinationGuard, WorkloadSupervisor};
use crate::workload::{WorkloadDriver, WorkloadKind, WorkloadSpec};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// What one reconcile pass did for one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub kind: WorkloadKind,
    /// New identities started.
    pub started: Vec<String>,
    /// Identities whose spec changed: stopped, then started again.
    pub replaced: Vec<String>,
    /// Identities no longer desired.
    pub stopped: Vec<String>,
    pub unchanged: Vec<String>,
    /// Identities that could not be started; left unregistered.
    pub failed: Vec<String>,
    /// The pass was cut short by shutdown.
    pub cancelled: bool,
}

impl ReconcileReport {
    fn new(kind: WorkloadKind) -> Self {
        Self {
            kind,
            started: Vec::new(),
            replaced: Vec::new(),
            stopped: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    /// Whether the pass changed anything.
    pub fn changed(&self) -> bool {
        !(self.started.is_empty() && self.replaced.is_empty() && self.stopped.is_empty())
    }
}

/// Applies the minimal set of stops and starts to match a desired list.
pub struct Reconciler;

impl Reconciler {
    /// Reconcile `supervisor` against `desired` under the coordination lock.
    pub async fn reconcile<D: WorkloadDriver>(
        supervisor: &WorkloadSupervisor<D>,
        desired: &[D::Spec],
    ) -> ReconcileReport {
        let guard = supervisor.lock().await;
        Self::reconcile_locked(supervisor, &guard, desired).await
    }

    /// [`reconcile`](Self::reconcile) for callers already holding the lock.
    ///
    /// Additions and changes are applied first, removals second. A changed
    /// spec (including its environment) replaces the running workload; a
    /// running workload is never mutated in place. Per-identity failures are
    /// recorded and do not stop the pass.
    pub async fn reconcile_locked<D: WorkloadDriver>(
        supervisor: &WorkloadSupervisor<D>,
        guard: &CoordinationGuard<'_>,
        desired: &[D::Spec],
    ) -> ReconcileReport {
        let kind = supervisor.kind();
        let mut report = ReconcileReport::new(kind);

        // A validated `DesiredState` has no duplicates; a bare slice passed
        // here may.
        let (desired, duplicates) = dedup_by_backend(desired);
        for backend in duplicates {
            warn!("Ignoring duplicate {} entry for backend {}", kind, backend);
        }

        for spec in &desired {
            if supervisor.token().is_cancelled() {
                report.cancelled = true;
                return report;
            }

            let backend = spec.backend_name().to_string();
            let replacing = match supervisor.get(&backend) {
                None => false,
                Some(current) if current.spec() == spec => {
                    report.unchanged.push(backend);
                    continue;
                }
                Some(current) => {
                    info!(
                        "{} {} changed ({} -> {}), replacing",
                        kind,
                        backend,
                        current.spec().destination(),
                        spec.destination()
                    );
                    drop(current);
                    supervisor.stop_locked(guard, &backend).await;
                    true
                }
            };

            match supervisor.start_with_retries_locked(guard, spec.clone()).await {
                Ok(_) if replacing => report.replaced.push(backend),
                Ok(_) => report.started.push(backend),
                Err(ManagerError::Cancelled) => {
                    report.cancelled = true;
                    return report;
                }
                Err(e) => {
                    error!("Could not start {} {}: {}", kind, backend, e);
                    report.failed.push(backend);
                }
            }
        }

        let wanted: HashSet<&str> = desired.iter().map(|s| s.backend_name()).collect();
        let mut stale: Vec<String> = supervisor
            .registry()
            .ids()
            .into_iter()
            .filter(|id| !wanted.contains(id.as_str()))
            .collect();
        stale.sort();

        for backend in stale {
            info!("{} {} is no longer desired, stopping", kind, backend);
            if supervisor.stop_locked(guard, &backend).await {
                report.stopped.push(backend);
            }
        }

        debug!(
            "Reconciled {}: {} started, {} replaced, {} stopped, {} unchanged, {} failed",
            kind,
            report.started.len(),
            report.replaced.len(),
            report.stopped.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::SupervisorSettings;
    use crate::error::Result;
    use crate::process::LaunchPlan;
    use crate::supervisor::coordination_lock;
    use crate::workload::ServeSpec;
    use async_trait::async_trait;
    use std::time::Duration;

    struct SleepDriver;

    #[async_trait]
    impl WorkloadDriver for SleepDriver {
        type Spec = ServeSpec;

        async fn prepare(&self, _spec: &ServeSpec) -> Result<()> {
            Ok(())
        }

        fn launch_plan(&self, spec: &ServeSpec) -> Result<LaunchPlan> {
            // An addr of "fail" launches something that exits at once.
            let program = if spec.addr == "fail" { "true" } else { "sleep" };
            Ok(LaunchPlan::new(program, spec.id().to_string()).with_arg("30"))
        }

        async fn teardown(&self, _spec: &ServeSpec) -> Result<()> {
            Ok(())
        }
    }

    fn supervisor() -> WorkloadSupervisor<SleepDriver> {
        WorkloadSupervisor::new(
            SleepDriver,
            SupervisorSettings::new()
                .with_max_start_attempts(2)
                .with_retry_delay(Duration::from_millis(10))
                .with_launch_settle(Duration::from_millis(50))
                .with_stop_timeout(Duration::from_secs(2)),
            coordination_lock(),
            CancellationToken::new(),
        )
    }

    fn serve(name: &str, addr: &str) -> ServeSpec {
        ServeSpec::new(name, "http", addr)
    }

    #[tokio::test]
    async fn test_changes_and_removals() {
        let supervisor = supervisor();
        let first = Reconciler::reconcile(&supervisor, &[serve("a", ":1"), serve("b", ":2")]).await;
        assert_eq!(first.started.len(), 2);
        let old_a = supervisor.get("a").unwrap().pid();

        let second = Reconciler::reconcile(&supervisor, &[serve("a", ":9"), serve("c", ":3")]).await;
        assert_eq!(second.replaced, vec!["a".to_string()]);
        assert_eq!(second.started, vec!["c".to_string()]);
        assert_eq!(second.stopped, vec!["b".to_string()]);
        assert_ne!(supervisor.get("a").unwrap().pid(), old_a);
        assert_eq!(supervisor.get("a").unwrap().spec().addr, ":9");
        assert!(supervisor.get("b").is_none());

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_env_change_is_a_replacement() {
        let supervisor = supervisor();
        Reconciler::reconcile(&supervisor, &[serve("a", ":1")]).await;

        let changed = serve("a", ":1").with_env("RCLONE_VFS_CACHE_MODE", "full");
        let report = Reconciler::reconcile(&supervisor, &[changed]).await;
        assert_eq!(report.replaced, vec!["a".to_string()]);

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_failure_is_contained() {
        let supervisor = supervisor();
        let report =
            Reconciler::reconcile(&supervisor, &[serve("bad", "fail"), serve("good", ":1")]).await;

        assert_eq!(report.failed, vec!["bad".to_string()]);
        assert_eq!(report.started, vec!["good".to_string()]);
        assert!(supervisor.get("bad").is_none());

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_duplicates_keep_first() {
        let supervisor = supervisor();
        let report = Reconciler::reconcile(&supervisor, &[serve("a", ":1"), serve("a", ":2")]).await;

        assert_eq!(report.started, vec!["a".to_string()]);
        assert_eq!(supervisor.get("a").unwrap().spec().addr, ":1");
        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_cancelled_pass_starts_nothing() {
        let supervisor = supervisor();
        supervisor.token().cancel();
        let report = Reconciler::reconcile(&supervisor, &[serve("a", ":1")]).await;
        assert!(report.cancelled);
        assert!(supervisor.registry().is_empty());
    }
}
