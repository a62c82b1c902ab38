//! Desired-state document loading and validation.
//!
//! The desired state is a YAML document listing mounts and serves:
//!
//! ```yaml
//! mounts:
//!   - backendName: b1
//!     mountPoint: /mnt/b1
//!     environment:
//!       RCLONE_VFS_CACHE_MODE: full
//! serves:
//!   - backendName: b2
//!     protocol: webdav
//!     addr: ":8080"
//! ```

use crate::error::{ManagerError, Result};
use crate::workload::{MountSpec, ServeSpec, WorkloadSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Immutable snapshot of the declarative configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub mounts: Vec<MountSpec>,
    pub serves: Vec<ServeSpec>,
}

/// On-disk shape; lists may be missing or null.
#[derive(Debug, Deserialize)]
struct RawDesiredState {
    #[serde(default)]
    mounts: Option<Vec<MountSpec>>,
    #[serde(default)]
    serves: Option<Vec<ServeSpec>>,
}

impl DesiredState {
    pub fn new(mounts: Vec<MountSpec>, serves: Vec<ServeSpec>) -> Self {
        Self { mounts, serves }
    }

    /// Parse a YAML document. Does not validate.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Option<RawDesiredState> = serde_yaml::from_str(yaml)?;
        Ok(raw.map_or_else(Self::default, |raw| Self {
            mounts: raw.mounts.unwrap_or_default(),
            serves: raw.serves.unwrap_or_default(),
        }))
    }

    /// Read, parse and validate the document at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManagerError::io_with_path(e, path))?;

        let state = Self::from_yaml_str(&yaml).map_err(|e| ManagerError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        state.validate()?;

        debug!(
            "Loaded desired state from {}: {} mount(s), {} serve(s)",
            path.display(),
            state.mounts.len(),
            state.serves.len()
        );
        Ok(state)
    }

    /// Reject specs that cannot launch and duplicate backends within a kind.
    pub fn validate(&self) -> Result<()> {
        validate_specs(&self.mounts)?;
        validate_specs(&self.serves)
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty() && self.serves.is_empty()
    }

    /// Mount points of every desired mount.
    pub fn mount_points(&self) -> Vec<PathBuf> {
        self.mounts.iter().map(|m| m.mount_point.clone()).collect()
    }
}

fn validate_specs<S: WorkloadSpec>(specs: &[S]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        spec.validate()?;
        if !seen.insert(spec.backend_name()) {
            return Err(ManagerError::DuplicateBackend {
                kind: S::KIND,
                backend: spec.backend_name().to_string(),
            });
        }
    }
    Ok(())
}

/// Drop later occurrences of a backend name, keeping the first.
///
/// Returns the names that were dropped.
pub(crate) fn dedup_by_backend<S: WorkloadSpec>(specs: &[S]) -> (Vec<S>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(specs.len());
    let mut dropped = Vec::new();
    for spec in specs {
        if seen.insert(spec.backend_name().to_string()) {
            kept.push(spec.clone());
        } else {
            dropped.push(spec.backend_name().to_string());
        }
    }
    (kept, dropped)
}

/// Where reconfiguration reads the desired state from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load and validate the current desired state.
    async fn load(&self) -> Result<DesiredState>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// [`ConfigSource`] backed by a YAML file.
#[derive(Debug, Clone)]
pub struct YamlConfigSource {
    path: PathBuf,
}

impl YamlConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for YamlConfigSource {
    async fn load(&self) -> Result<DesiredState> {
        DesiredState::load(&self.path).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
