//! Workload kinds, specs and live entries.
//!
//! A workload is one long-running rclone child process, identified by
//! `(kind, backend)`. What differs between kinds (the command line, the
//! precondition before launch, the teardown before kill) lives behind
//! [`WorkloadDriver`]; everything else is shared by the generic supervisor.

mod mount;
mod serve;

pub use mount::{MountDriver, MountSpec};
pub use serve::{ServeDriver, ServeSpec};

use crate::error::Result;
use crate::process::{LaunchPlan, ProcessHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Workload category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Mount,
    Serve,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Mount => "mount",
            WorkloadKind::Serve => "serve",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a workload: unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkloadId {
    pub kind: WorkloadKind,
    pub backend: String,
}

impl WorkloadId {
    pub fn new(kind: WorkloadKind, backend: impl Into<String>) -> Self {
        Self {
            kind,
            backend: backend.into(),
        }
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.backend)
    }
}

/// Desired parameters of one workload.
pub trait WorkloadSpec: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: WorkloadKind;

    /// Backend name; unique within the kind.
    fn backend_name(&self) -> &str;

    /// Environment overrides for the child.
    fn environment(&self) -> &BTreeMap<String, String>;

    /// Human-readable destination (mount path, or protocol and address).
    fn destination(&self) -> String;

    /// Reject specs that can never launch.
    fn validate(&self) -> Result<()>;

    fn id(&self) -> WorkloadId {
        WorkloadId::new(Self::KIND, self.backend_name())
    }
}

/// Kind-specific launch and teardown behaviour.
#[async_trait]
pub trait WorkloadDriver: Send + Sync + 'static {
    type Spec: WorkloadSpec;

    fn kind(&self) -> WorkloadKind {
        <Self::Spec as WorkloadSpec>::KIND
    }

    /// Make sure the launch can succeed (e.g. create the mount point).
    /// Runs before every attempt.
    async fn prepare(&self, spec: &Self::Spec) -> Result<()>;

    /// Command line and environment for `spec`.
    fn launch_plan(&self, spec: &Self::Spec) -> Result<LaunchPlan>;

    /// Release the workload's endpoint before its process is killed.
    async fn teardown(&self, spec: &Self::Spec) -> Result<()>;
}

/// A running workload: its spec plus the live process handle.
///
/// Owns the handle exclusively. Dropping the last reference kills the child.
#[derive(Debug)]
pub struct Workload<S> {
    spec: S,
    handle: ProcessHandle,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    grace_period: Duration,
}

impl<S: WorkloadSpec> Workload<S> {
    pub fn new(spec: S, handle: ProcessHandle, grace_period: Duration) -> Self {
        Self {
            spec,
            handle,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            grace_period,
        }
    }

    pub fn id(&self) -> WorkloadId {
        self.spec.id()
    }

    pub fn spec(&self) -> &S {
        &self.spec
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn in_grace_period(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) < self.grace_period
    }

    pub fn status(&self) -> WorkloadStatus {
        WorkloadStatus {
            kind: S::KIND,
            backend: self.spec.backend_name().to_string(),
            destination: self.spec.destination(),
            pid: self.pid(),
            started_at: self.started_at_utc,
            in_grace_period: self.in_grace_period(Instant::now()),
            exited: self.handle.has_exited(),
        }
    }
}

/// Serializable snapshot of one running workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub kind: WorkloadKind,
    pub backend: String,
    pub destination: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub in_grace_period: bool,
    /// The process exited but the monitor has not replaced it yet.
    pub exited: bool,
}
