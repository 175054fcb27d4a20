//! Configuration type definitions for fleetnode
//!
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a missing or partial config file still yields a working agent.

use serde::{Deserialize, Serialize};

/// Main configuration struct for fleetnode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Node identity and HTTP control surface binding
    pub node: NodeConfig,
    /// Cluster membership configuration
    pub cluster: ClusterConfig,
    /// Package installation and process supervision
    pub services: ServicesConfig,
    /// Health monitor configuration
    pub health: HealthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

// ============================================================================
// Node Configuration
// ============================================================================

/// Node identity and HTTP control surface binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name announced to cluster peers
    pub name: String,
    /// Host to bind the control surface to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "fleetnode1".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// ============================================================================
// Cluster Configuration
// ============================================================================

/// Cluster membership configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Port the membership listener binds to.
    pub bind_port: u16,
    /// Peer addresses (`host:port`) to join at startup. Empty = standalone.
    pub members: Vec<String>,
    /// Join attempts before startup is aborted.
    pub join_attempts: u32,
    /// Delay between join attempts in seconds.
    pub join_retry_delay_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_port: 7946,
            members: Vec::new(),
            join_attempts: 5,
            join_retry_delay_secs: 3,
        }
    }
}

// ============================================================================
// Services Configuration
// ============================================================================

/// Package installation and process supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Parent directory for staging directories. `None` = OS temp dir.
    pub staging_dir: Option<String>,
    /// Substring identifying the executable entry of a package.
    pub executable_marker: String,
    /// How long a fresh process must stay alive to count as started.
    pub stability_window_ms: u64,
    /// Largest accepted package upload.
    pub max_package_bytes: usize,
    /// Bytes of stdout and of stderr retained per process for diagnostics.
    pub output_capture_bytes: usize,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            executable_marker: ".exe".to_string(),
            stability_window_ms: 2_000,
            max_package_bytes: 50 * 1024 * 1024,
            output_capture_bytes: 64 * 1024,
        }
    }
}

// ============================================================================
// Health Configuration
// ============================================================================

/// Health monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable or disable the health monitor.
    pub enabled: bool,
    /// Seconds between probe rounds.
    pub interval_secs: u64,
    /// Per-probe timeout in milliseconds (connect + call).
    pub probe_timeout_ms: u64,
    /// Host the service health endpoints listen on.
    pub host: String,
    /// Default gRPC health port when a package does not declare one.
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            probe_timeout_ms: 1_000,
            host: "127.0.0.1".to_string(),
            port: 50051,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line output with targets
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
    /// Optional file to append logs to (stdout when unset)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}
