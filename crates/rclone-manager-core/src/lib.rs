//! rclone manager core - supervision and reconciliation of rclone workloads.
//!
//! Keeps a set of `rclone mount` and `rclone serve` processes in line with a
//! declarative desired state. A backing `rclone rcd` daemon is started first
//! and stopped last; workloads that die are restarted after their grace
//! period; a changed desired state is applied with the minimal set of stops
//! and starts.
//!
//! The binary in the `rclone-manager` crate wires this up to the command line,
//! signals and a file watcher. Everything here can be driven directly:
//!
//! ```rust,ignore
//! use rclone_manager_core::{DesiredState, Orchestrator, OrchestratorSettings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rclone_manager_core::Result<()> {
//!     let desired = DesiredState::load("/data/config.yaml").await?;
//!     let orchestrator = Arc::new(Orchestrator::new(OrchestratorSettings::default())?);
//!
//!     orchestrator.initialize(desired).await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod daemon;
pub mod error;
pub mod manifest;
pub mod monitor;
pub mod options;
pub mod orchestrator;
pub mod platform;
pub mod process;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod supervisor;
pub mod workload;

pub use cancel::{CancellationToken, CancelledError};
pub use config::{OrchestratorSettings, SupervisorSettings};
pub use daemon::{BackingDaemon, DaemonControl, RcClient};
pub use error::{ManagerError, Result};
pub use manifest::{ConfigSource, DesiredState, YamlConfigSource};
pub use monitor::{HealthMonitor, MonitorHandle, PassReport};
pub use options::{EffectiveOptions, SharedEnvironmentContext};
pub use orchestrator::{Orchestrator, OrchestratorStatus, Phase, ReconcileOutcome};
pub use reconcile::{ReconcileReport, Reconciler};
pub use registry::WorkloadRegistry;
pub use supervisor::WorkloadSupervisor;
pub use workload::{
    MountDriver, MountSpec, ServeDriver, ServeSpec, WorkloadId, WorkloadKind, WorkloadSpec,
    WorkloadStatus,
};
