//! Protocol serve workloads (`rclone serve`).

use super::{WorkloadDriver, WorkloadKind, WorkloadSpec};
use crate::error::{ManagerError, Result};
use crate::process::LaunchPlan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Desired serve endpoint for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeSpec {
    pub backend_name: String,
    /// `rclone serve` sub-command, e.g. `webdav`, `sftp`, `http`.
    pub protocol: String,
    pub addr: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl ServeSpec {
    pub fn new(
        backend_name: impl Into<String>,
        protocol: impl Into<String>,
        addr: impl Into<String>,
    ) -> Self {
        Self {
            backend_name: backend_name.into(),
            protocol: protocol.into(),
            addr: addr.into(),
            environment: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

impl WorkloadSpec for ServeSpec {
    const KIND: WorkloadKind = WorkloadKind::Serve;

    fn backend_name(&self) -> &str {
        &self.backend_name
    }

    fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    fn destination(&self) -> String {
        format!("{} on {}", self.protocol, self.addr)
    }

    fn validate(&self) -> Result<()> {
        if self.backend_name.trim().is_empty() {
            return Err(ManagerError::validation("backendName", "must not be empty"));
        }
        if self.protocol.trim().is_empty() {
            return Err(ManagerError::validation(
                "protocol",
                format!("serve {} has an empty protocol", self.backend_name),
            ));
        }
        if self.addr.trim().is_empty() {
            return Err(ManagerError::validation(
                "addr",
                format!("serve {} has an empty addr", self.backend_name),
            ));
        }
        Ok(())
    }
}

/// Launches `rclone serve`. Killing the process is the whole teardown.
pub struct ServeDriver {
    rclone_binary: PathBuf,
}

impl ServeDriver {
    pub fn new(rclone_binary: impl Into<PathBuf>) -> Self {
        Self {
            rclone_binary: rclone_binary.into(),
        }
    }
}

#[async_trait]
impl WorkloadDriver for ServeDriver {
    type Spec = ServeSpec;

    async fn prepare(&self, _spec: &ServeSpec) -> Result<()> {
        Ok(())
    }

    fn launch_plan(&self, spec: &ServeSpec) -> Result<LaunchPlan> {
        spec.validate()?;
        Ok(
            LaunchPlan::new(&self.rclone_binary, spec.id().to_string())
                .with_args([
                    "serve".to_string(),
                    spec.protocol.clone(),
                    format!("{}:", spec.backend_name),
                    "--addr".to_string(),
                    spec.addr.clone(),
                ])
                .with_env_overrides(spec.environment.clone()),
        )
    }

    async fn teardown(&self, _spec: &ServeSpec) -> Result<()> {
        Ok(())
    }
}
