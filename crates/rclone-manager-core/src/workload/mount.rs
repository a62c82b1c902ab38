//! FUSE mount workloads (`rclone mount`).

use super::{WorkloadDriver, WorkloadKind, WorkloadSpec};
use crate::error::{ManagerError, Result};
use crate::options::SharedEnvironmentContext;
use crate::platform;
use crate::process::LaunchPlan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Desired mount of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    pub backend_name: String,
    pub mount_point: PathBuf,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl MountSpec {
    pub fn new(backend_name: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            backend_name: backend_name.into(),
            mount_point: mount_point.into(),
            environment: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

impl WorkloadSpec for MountSpec {
    const KIND: WorkloadKind = WorkloadKind::Mount;

    fn backend_name(&self) -> &str {
        &self.backend_name
    }

    fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    fn destination(&self) -> String {
        self.mount_point.display().to_string()
    }

    fn validate(&self) -> Result<()> {
        if self.backend_name.trim().is_empty() {
            return Err(ManagerError::validation("backendName", "must not be empty"));
        }
        if self.mount_point.as_os_str().is_empty() {
            return Err(ManagerError::validation(
                "mountPoint",
                format!("mount {} has an empty mountPoint", self.backend_name),
            ));
        }
        if !self.mount_point.is_absolute() {
            return Err(ManagerError::validation(
                "mountPoint",
                format!(
                    "mount {} has a relative mountPoint: {}",
                    self.backend_name,
                    self.mount_point.display()
                ),
            ));
        }
        Ok(())
    }
}

/// Launches `rclone mount` and releases the mount before the process is killed.
///
/// Each mount is its own FUSE server process, so the daemon's rc API does
/// not know about it; unmounting goes through `fusermount` directly.
pub struct MountDriver {
    rclone_binary: PathBuf,
    options: Arc<SharedEnvironmentContext>,
}

impl MountDriver {
    pub fn new(rclone_binary: impl Into<PathBuf>, options: Arc<SharedEnvironmentContext>) -> Self {
        Self {
            rclone_binary: rclone_binary.into(),
            options,
        }
    }
}

#[async_trait]
impl WorkloadDriver for MountDriver {
    type Spec = MountSpec;

    async fn prepare(&self, spec: &MountSpec) -> Result<()> {
        ensure_mount_point(&spec.mount_point).await
    }

    fn launch_plan(&self, spec: &MountSpec) -> Result<LaunchPlan> {
        spec.validate()?;
        let effective = self.options.overlay(&spec.environment);
        debug!("Effective options for mount {}: {}", spec.backend_name, effective.to_json());

        Ok(
            LaunchPlan::new(&self.rclone_binary, spec.id().to_string())
                .with_args([
                    "mount".to_string(),
                    format!("{}:", spec.backend_name),
                    spec.mount_point.display().to_string(),
                ])
                .with_args(effective.override_flags())
                .with_env_overrides(spec.environment.clone()),
        )
    }

    async fn teardown(&self, spec: &MountSpec) -> Result<()> {
        let mount_point = &spec.mount_point;
        if !platform::is_mounted(mount_point).await {
            debug!("{} is not mounted; nothing to release", mount_point.display());
            return Ok(());
        }

        let error = match platform::unmount(mount_point).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!("Unmounting {} failed ({}), retrying lazily", mount_point.display(), error);
        platform::force_unmount(mount_point)
            .await
            .map_err(|e| ManagerError::TeardownFailed {
                kind: WorkloadKind::Mount,
                backend: spec.backend_name.clone(),
                message: format!("unmount: {}; lazy unmount: {}", error, e),
            })
    }
}

/// Create the mount point if needed, clearing a dead FUSE mount in the way.
async fn ensure_mount_point(mount_point: &Path) -> Result<()> {
    match tokio::fs::metadata(mount_point).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(ManagerError::validation(
                "mountPoint",
                format!("{} exists and is not a directory", mount_point.display()),
            ))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("Creating mount point {}", mount_point.display());
        }
        Err(e) => {
            // Typically ENOTCONN from a FUSE mount whose process died.
            warn!("Mount point {} is unusable: {}", mount_point.display(), e);
            if let Err(e) = platform::force_unmount(mount_point).await {
                debug!("Clearing {} failed: {}", mount_point.display(), e);
            }
        }
    }

    tokio::fs::create_dir_all(mount_point)
        .await
        .map_err(|e| ManagerError::io_with_path(e, mount_point))
}
