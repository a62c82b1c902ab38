//! Child process management.
//!
//! Spawning external commands with an overlaid environment, owning the
//! resulting child through a [`ProcessHandle`], and judging liveness.
//!
//! Every spawned child is reaped by a background task, so exit is observed
//! as soon as it happens and no zombie is left behind. Liveness checks used
//! by the health monitor go through [`ProcessHealth`] instead, which only
//! needs a pid.

mod environment;
mod health;
mod launcher;

pub use environment::{overlay_environment, prepare_environment};
pub use health::{Liveness, ProcessHealth};
pub use launcher::{ExitOutcome, LaunchPlan, ProcessHandle, ProcessLauncher};
