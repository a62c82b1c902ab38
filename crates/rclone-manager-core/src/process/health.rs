//! Liveness assessment for supervised processes.

use crate::platform;
use std::time::{Duration, Instant};

/// Result of assessing one supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Started too recently to be judged.
    InGracePeriod,
    Alive,
    Dead,
}

/// Stateless liveness predicate over OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessHealth;

impl ProcessHealth {
    /// Whether the OS process `pid` still exists.
    ///
    /// Ambiguous probes count as alive; see [`platform::is_process_alive`].
    pub fn is_alive(pid: u32) -> bool {
        platform::is_process_alive(pid)
    }

    /// Assess a process started at `started_at` with the given grace period.
    pub fn assess(pid: u32, started_at: Instant, grace_period: Duration, now: Instant) -> Liveness {
        if now.saturating_duration_since(started_at) < grace_period {
            return Liveness::InGracePeriod;
        }
        if Self::is_alive(pid) {
            Liveness::Alive
        } else {
            Liveness::Dead
        }
    }
}
