//! Backing daemon: the `rclone rcd` process and its rc control surface.
//!
//! - `process` - spawning and stopping the daemon ([`BackingDaemon`])
//! - `control` - the rc HTTP API ([`DaemonControl`], [`RcClient`])
//! - `watchdog` - restarting the daemon when it dies ([`DaemonWatchdog`])

mod control;
mod process;
mod watchdog;

pub use control::{DaemonControl, RcClient};
pub use process::{BackingDaemon, DaemonProcess};
pub use watchdog::{DaemonWatchdog, StaleMountSource};

use crate::cancel::CancellationToken;
use crate::error::{ManagerError, Result};
use crate::retry::{retry_with_cancel, RetryPolicy};
use tracing::info;

/// Probe the daemon until it answers, at most `policy.max_attempts` times.
///
/// Returns [`ManagerError::DaemonNotReady`] when every probe failed and
/// [`ManagerError::Cancelled`] when `token` fires first.
pub async fn wait_ready(
    control: &dyn DaemonControl,
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<()> {
    let (result, stats) = retry_with_cancel(
        policy,
        token,
        "rclone rcd readiness",
        |_| control.ping(),
        |_| true,
    )
    .await;

    match result {
        Ok(()) => {
            info!("rclone rcd is ready after {} probe(s)", stats.attempts);
            Ok(())
        }
        Err(ManagerError::Cancelled) => Err(ManagerError::Cancelled),
        Err(_) => Err(ManagerError::DaemonNotReady {
            attempts: stats.attempts,
        }),
    }
}
