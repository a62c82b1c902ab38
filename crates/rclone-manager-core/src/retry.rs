//! Bounded retry with a fixed delay and cooperative cancellation.
//!
//! Used for workload start attempts and for the backing daemon's readiness
//! probe. The delay between attempts is interruptible: cancelling the token
//! ends the loop immediately with [`ManagerError::Cancelled`].

use crate::cancel::{self, CancellationToken};
use crate::error::{ManagerError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry `operation` under `policy` until it succeeds, fails with a
/// non-retryable error, runs out of attempts, or `token` is cancelled.
///
/// `label` prefixes the per-attempt log lines.
pub async fn retry_with_cancel<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    label: &str,
    mut operation: F,
    should_retry: impl Fn(&ManagerError) -> bool,
) -> (Result<T>, RetryStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut stats = RetryStats::default();
    let mut last_err = ManagerError::Cancelled;

    for attempt in 1..=policy.max_attempts {
        if token.is_cancelled() {
            return (Err(ManagerError::Cancelled), stats);
        }
        stats.attempts = attempt;

        match operation(attempt).await {
            Ok(value) => {
                stats.success = true;
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", label, attempt);
                }
                return (Ok(value), stats);
            }
            Err(ManagerError::Cancelled) => return (Err(ManagerError::Cancelled), stats),
            Err(e) => {
                stats.last_error = Some(e.to_string());

                if !should_retry(&e) {
                    debug!("{}: error is not retryable: {}", label, e);
                    return (Err(e), stats);
                }

                if attempt >= policy.max_attempts {
                    last_err = e;
                    break;
                }

                warn!(
                    "{}: attempt {}/{} failed: {}. Retrying in {:?}",
                    label, attempt, policy.max_attempts, e, policy.delay
                );

                if cancel::sleep(token, policy.delay).await.is_err() {
                    return (Err(ManagerError::Cancelled), stats);
                }
            }
        }
    }

    warn!(
        "{}: all {} attempts exhausted. Last error: {}",
        label, policy.max_attempts, last_err
    );
    (Err(last_err), stats)
}
