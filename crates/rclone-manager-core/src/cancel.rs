//! Cancellation shared by background loops and long waits.
//!
//! The token itself is `tokio_util`'s: the orchestrator owns the root and
//! hands [child tokens](CancellationToken::child_token) to monitors, the
//! watchdog and the reconfiguration trigger. This module adds the two
//! checks the supervision code needs on top of it.
//!
//! # Example
//!
//! ```
//! use rclone_manager_core::cancel::{self, CancellationToken};
//!
//! let shutdown = CancellationToken::new();
//! let monitor = shutdown.child_token();
//!
//! shutdown.cancel();
//! assert!(cancel::check(&monitor).is_err());
//! ```

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::ManagerError {
    fn from(_: CancelledError) -> Self {
        crate::error::ManagerError::Cancelled
    }
}

/// `Err` once `token` is cancelled.
pub fn check(token: &CancellationToken) -> Result<(), CancelledError> {
    if token.is_cancelled() {
        Err(CancelledError)
    } else {
        Ok(())
    }
}

/// Sleep for `duration`, returning early with `Err` if `token` is cancelled.
pub async fn sleep(token: &CancellationToken, duration: Duration) -> Result<(), CancelledError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => check(token),
        _ = token.cancelled() => Err(CancelledError),
    }
}
