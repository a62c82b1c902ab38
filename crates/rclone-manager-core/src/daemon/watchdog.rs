//! Restarts the backing daemon when it dies.

use super::process::BackingDaemon;
use crate::cancel::CancellationToken;
use crate::monitor::{spawn_loop, MonitorHandle};
use crate::platform;
use crate::process::Liveness;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Supplies the mount points to clear before the daemon is restarted.
pub type StaleMountSource = Arc<dyn Fn() -> Vec<PathBuf> + Send + Sync>;

/// Watches the [`BackingDaemon`] and restarts it after a crash.
pub struct DaemonWatchdog {
    daemon: Arc<BackingDaemon>,
    stale_mounts: StaleMountSource,
    interval: Duration,
    token: CancellationToken,
}

impl DaemonWatchdog {
    /// The watchdog stops when `parent` is cancelled.
    pub fn new(
        daemon: Arc<BackingDaemon>,
        stale_mounts: StaleMountSource,
        interval: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            daemon,
            stale_mounts,
            interval,
            token: parent.child_token(),
        }
    }

    /// Check the daemon once. Returns the new pid if it was restarted.
    pub async fn run_pass(&self) -> Option<u32> {
        match self.daemon.liveness(Instant::now())? {
            Liveness::InGracePeriod => {
                debug!("Skipping rclone rcd check (within grace period)");
                None
            }
            Liveness::Alive => None,
            Liveness::Dead => {
                if self.token.is_cancelled() {
                    return None;
                }
                warn!(
                    "rclone rcd (pid {}) died. Restarting...",
                    self.daemon.pid().unwrap_or_default()
                );

                for mount_point in (self.stale_mounts)() {
                    if let Err(e) = platform::force_unmount(&mount_point).await {
                        debug!("{} may not be mounted: {}", mount_point.display(), e);
                    }
                }

                match self.daemon.restart().await {
                    Ok(pid) => {
                        info!("Restarted rclone rcd with new PID {}", pid);
                        Some(pid)
                    }
                    Err(e) => {
                        error!("Failed to restart rclone rcd: {}", e);
                        None
                    }
                }
            }
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let interval = self.interval;
        let token = self.token.clone();
        let watchdog = Arc::new(self);

        spawn_loop("rclone rcd watchdog".to_string(), interval, token, move || {
            let watchdog = Arc::clone(&watchdog);
            async move {
                watchdog.run_pass().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::LaunchPlan;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn daemon(program: &str) -> Arc<BackingDaemon> {
        Arc::new(BackingDaemon::from_plan(
            LaunchPlan::new(program, "fake rcd").with_arg("30"),
            Duration::ZERO,
            Duration::from_secs(2),
        ))
    }

    #[tokio::test]
    async fn test_unstarted_daemon_is_left_alone() {
        let watchdog = DaemonWatchdog::new(
            daemon("sleep"),
            Arc::new(Vec::<PathBuf>::new),
            Duration::from_secs(1),
            &CancellationToken::new(),
        );
        assert_eq!(watchdog.run_pass().await, None);
    }

    #[tokio::test]
    async fn test_dead_daemon_is_restarted() {
        let daemon = daemon("sleep");
        let first = daemon.start().unwrap();
        crate::platform::signal_process(first, crate::platform::ProcessSignal::Kill).unwrap();
        daemon
            .current()
            .unwrap()
            .handle()
            .wait_for_exit(Duration::from_secs(5))
            .await;

        let cleared = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleared);
        let source: StaleMountSource = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });

        let watchdog = DaemonWatchdog::new(
            Arc::clone(&daemon),
            source,
            Duration::from_secs(1),
            &CancellationToken::new(),
        );
        let restarted = watchdog.run_pass().await.unwrap();
        assert_ne!(restarted, first);
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
        assert!(daemon.is_running());

        // Healthy now.
        assert_eq!(watchdog.run_pass().await, None);
        daemon.stop().await.unwrap();
    }
}
