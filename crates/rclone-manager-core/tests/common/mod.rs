//! Shared fixtures: a fake rclone executable and an in-memory control surface.

#![allow(dead_code)]

use async_trait::async_trait;
use rclone_manager_core::{
    DaemonControl, ManagerError, OrchestratorSettings, Result, SupervisorSettings,
};
use serde_json::{json, Value};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

/// Path to a script that ignores its arguments and sleeps.
///
/// Written once per test binary so no test execs a file another thread is
/// still writing.
pub fn fake_rclone() -> &'static Path {
    static SCRIPT: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT.get_or_init(|| {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("rclone");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 300\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}

/// Settings with every delay shrunk for tests.
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings::new()
        .with_rclone_binary(fake_rclone())
        .with_rc_addr("127.0.0.1:1")
        .with_ready_attempts(3)
        .with_ready_interval(Duration::from_millis(10))
        .with_daemon_stop_timeout(Duration::from_secs(2))
        .with_supervisor(
            SupervisorSettings::new()
                .with_retry_delay(Duration::from_millis(10))
                .with_launch_settle(Duration::from_millis(50))
                .with_stop_timeout(Duration::from_secs(2)),
        )
}

/// In-memory [`DaemonControl`] recording every rc endpoint it is asked for.
#[derive(Default)]
pub struct FakeControl {
    pub fail_ping: AtomicBool,
    pub pings: AtomicU32,
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeControl {
    /// Endpoints called so far, readiness probes excluded.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DaemonControl for FakeControl {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(ManagerError::Network {
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn options(&self) -> Result<Value> {
        self.calls.lock().unwrap().push("options/get");
        Ok(json!({
            "mount": { "AllowOther": false, "DaemonTimeout": 0 },
            "vfs": { "CacheMode": "off", "DirCacheTime": 300_000_000_000i64 },
            "main": { "Transfers": 4 }
        }))
    }
}

/// Poll `condition` every 20ms for up to `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
