//! Error types for the rclone manager.
//!
//! Every fallible operation in the library returns [`Result`]. Errors that
//! belong to a single workload are logged and contained by the caller; only
//! startup conditions (invalid desired state, daemon never ready) are fatal.

use crate::workload::WorkloadKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the rclone manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("YAML error: {message}")]
    Yaml {
        message: String,
        #[source]
        source: Option<serde_yaml::Error>,
    },

    // Desired state errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate {kind} backend in desired state: {backend}")]
    DuplicateBackend { kind: WorkloadKind, backend: String },

    // Workload lifecycle errors
    #[error("Launch failed for {kind} {backend}: {message}")]
    LaunchFailed {
        kind: WorkloadKind,
        backend: String,
        message: String,
    },

    #[error("Gave up starting {kind} {backend} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        kind: WorkloadKind,
        backend: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Teardown failed for {kind} {backend}: {message}")]
    TeardownFailed {
        kind: WorkloadKind,
        backend: String,
        message: String,
    },

    #[error("Process signal failed for pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    // Backing daemon errors
    #[error("Backing daemon not ready after {attempts} attempts")]
    DaemonNotReady { attempts: u32 },

    #[error("Daemon control call {endpoint} failed: {message}")]
    DaemonControl {
        endpoint: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled by shutdown")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

impl From<std::io::Error> for ManagerError {
    fn from(err: std::io::Error) -> Self {
        ManagerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ManagerError {
    fn from(err: serde_json::Error) -> Self {
        ManagerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_yaml::Error> for ManagerError {
    fn from(err: serde_yaml::Error) -> Self {
        ManagerError::Yaml {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ManagerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ManagerError::Timeout(Duration::from_secs(0))
        } else {
            ManagerError::Network {
                message: err.to_string(),
            }
        }
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for ManagerError {
    fn from(err: nix::errno::Errno) -> Self {
        ManagerError::Io {
            message: err.desc().to_string(),
            path: None,
            source: Some(std::io::Error::from(err)),
        }
    }
}

impl From<url::ParseError> for ManagerError {
    fn from(err: url::ParseError) -> Self {
        ManagerError::Config {
            message: format!("invalid URL: {}", err),
        }
    }
}

impl ManagerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ManagerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a validation error on a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ManagerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error is worth another start attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ManagerError::LaunchFailed { .. }
                | ManagerError::Io { .. }
                | ManagerError::Network { .. }
                | ManagerError::Timeout(_)
                | ManagerError::DaemonControl { .. }
        )
    }
}
