//! Error types for fleetnode
//!
//! This module defines the error taxonomy shared by the registry, installer,
//! supervisor and control surface. Uses `thiserror` for ergonomic error
//! handling with automatic `Display` and `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Process exit description
// ============================================================================

/// How a service process terminated during its stability window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited with this code (0 included).
    Code(i32),
    /// No exit code was available (killed by a signal, wait failure, ...).
    Other(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Code(0) => write!(f, "exited with success code 0"),
            ExitReason::Code(code) => write!(f, "exit status {}", code),
            ExitReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for fleetnode operations.
#[derive(Error, Debug)]
pub enum FleetError {
    /// The uploaded bytes are not a readable zip archive.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// Wrong artifact cardinality in the package.
    #[error(
        "Invalid package: expected exactly one executable and one config.toml, found {executables} executable(s) and {configs} valid config(s)"
    )]
    InvalidPackage { executables: usize, configs: usize },

    /// An archive entry would be written outside the staging directory.
    #[error("Unsafe archive entry: {0}")]
    UnsafeEntry(String),

    /// The OS refused to create the service process.
    #[error("Failed to spawn service {id}: {source}")]
    SpawnFailure {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// The process terminated before the stability window elapsed.
    #[error("Service {id} did not stay up: {exit}, stdout: {stdout}, stderr: {stderr}")]
    UnstableStart {
        id: String,
        exit: ExitReason,
        stdout: String,
        stderr: String,
    },

    /// The package was installed and registered, but its first start failed.
    #[error("Service {id} installed but failed to start: {source}")]
    Startup {
        id: String,
        #[source]
        source: Box<FleetError>,
    },

    /// Unknown service id.
    #[error("Service not found: {0}")]
    NotFound(String),

    /// The service owns no live process.
    #[error("Service {0} has no live process")]
    NoProcess(String),

    /// The service already owns a live process.
    #[error("Service {0} is already running")]
    AlreadyRunning(String),

    /// Generated id collided with an existing record.
    #[error("Duplicate service id: {0}")]
    DuplicateId(String),

    /// Cluster membership failures (join exhausted, bind failure, ...)
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Returns `true` for errors caused by the request rather than the agent.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FleetError::NotFound(_) | FleetError::NoProcess(_) | FleetError::AlreadyRunning(_)
        )
    }

    /// The service id an install produced, when the install got that far.
    pub fn installed_id(&self) -> Option<&str> {
        match self {
            FleetError::Startup { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// A specialized `Result` type for fleetnode operations.
pub type Result<T> = std::result::Result<T, FleetError>;
