//! Centralized configuration for the rclone manager.
//!
//! Constants for supervision timing, the backing daemon and well-known paths,
//! plus the runtime settings structs that default from them.

use std::path::PathBuf;
use std::time::Duration;

/// Workload supervision timing.
pub struct SupervisionConfig;

impl SupervisionConfig {
    pub const MAX_START_ATTEMPTS: u32 = 3;
    pub const START_RETRY_DELAY: Duration = Duration::from_secs(5);
    pub const GRACE_PERIOD: Duration = Duration::from_secs(10);
    pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
    /// A process that exits within this window after spawn counts as a failed launch.
    pub const LAUNCH_SETTLE: Duration = Duration::from_millis(500);
    /// Time between SIGTERM and SIGKILL when stopping a workload.
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Backing daemon (`rclone rcd`) configuration.
pub struct DaemonConfig;

impl DaemonConfig {
    pub const BINARY: &'static str = "rclone";
    pub const RC_ADDR: &'static str = "localhost:5572";
    pub const READY_ATTEMPTS: u32 = 10;
    pub const READY_INTERVAL: Duration = Duration::from_secs(5);
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    /// Sections of `options/get` that make up the shared environment context.
    pub const OPTION_SECTIONS: &'static [&'static str] = &["mount", "vfs"];
}

/// Well-known paths and environment variable names.
pub struct PathsConfig;

impl PathsConfig {
    pub const DEFAULT_DESIRED_STATE: &'static str = "/data/config.yaml";
    pub const DEFAULT_RCLONE_CONF: &'static str = "/data/rclone.conf";
    pub const DESIRED_STATE_ENV: &'static str = "RCLONE_MANAGER_CONFIG";
    pub const DEBUG_MODE_ENV: &'static str = "DEBUG_MODE";
    pub const FUSERMOUNT: &'static str = "fusermount";
    pub const MOUNT_TABLE: &'static str = "/proc/self/mounts";
}

/// Runtime settings for one workload supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Maximum number of launch attempts (including the first one).
    pub max_start_attempts: u32,
    /// Delay between launch attempts.
    pub retry_delay: Duration,
    /// Crash detection is suppressed for this long after a start.
    pub grace_period: Duration,
    /// Health monitor polling interval.
    pub monitor_interval: Duration,
    /// Early-exit window checked after each spawn.
    pub launch_settle: Duration,
    /// SIGTERM to SIGKILL escalation timeout.
    pub stop_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_start_attempts: SupervisionConfig::MAX_START_ATTEMPTS,
            retry_delay: SupervisionConfig::START_RETRY_DELAY,
            grace_period: SupervisionConfig::GRACE_PERIOD,
            monitor_interval: SupervisionConfig::MONITOR_INTERVAL,
            launch_settle: SupervisionConfig::LAUNCH_SETTLE,
            stop_timeout: SupervisionConfig::STOP_TIMEOUT,
        }
    }
}

impl SupervisorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_start_attempts(mut self, attempts: u32) -> Self {
        self.max_start_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_launch_settle(mut self, settle: Duration) -> Self {
        self.launch_settle = settle;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// Runtime settings for the orchestrator and the backing daemon.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// rclone executable used for the daemon and every workload.
    pub rclone_binary: PathBuf,
    /// Address the rc API listens on.
    pub rc_addr: String,
    /// Readiness probe attempts before startup is abandoned.
    pub ready_attempts: u32,
    /// Delay between readiness probes.
    pub ready_interval: Duration,
    /// SIGINT to SIGKILL escalation timeout for the daemon.
    pub daemon_stop_timeout: Duration,
    /// Settings shared by the mount and serve supervisors.
    pub supervisor: SupervisorSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            rclone_binary: PathBuf::from(DaemonConfig::BINARY),
            rc_addr: DaemonConfig::RC_ADDR.to_string(),
            ready_attempts: DaemonConfig::READY_ATTEMPTS,
            ready_interval: DaemonConfig::READY_INTERVAL,
            daemon_stop_timeout: DaemonConfig::STOP_TIMEOUT,
            supervisor: SupervisorSettings::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rclone_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.rclone_binary = binary.into();
        self
    }

    pub fn with_rc_addr(mut self, addr: impl Into<String>) -> Self {
        self.rc_addr = addr.into();
        self
    }

    pub fn with_ready_attempts(mut self, attempts: u32) -> Self {
        self.ready_attempts = attempts.max(1);
        self
    }

    pub fn with_ready_interval(mut self, interval: Duration) -> Self {
        self.ready_interval = interval;
        self
    }

    pub fn with_daemon_stop_timeout(mut self, timeout: Duration) -> Self {
        self.daemon_stop_timeout = timeout;
        self
    }

    pub fn with_supervisor(mut self, supervisor: SupervisorSettings) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Base URL of the rc HTTP API.
    pub fn rc_url(&self) -> String {
        if self.rc_addr.starts_with("http://") || self.rc_addr.starts_with("https://") {
            self.rc_addr.clone()
        } else {
            format!("http://{}/", self.rc_addr)
        }
    }
}
