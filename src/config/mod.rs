//! Configuration management for fleetnode
//!
//! Configuration is loaded from `~/.fleetnode/config.json` (or an explicit
//! path) with environment variable overrides applied on top.

mod types;

pub use types::*;

use crate::error::{FleetError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

impl Config {
    /// Returns the fleetnode configuration directory path (~/.fleetnode)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fleetnode")
    }

    /// Returns the path to the config file (~/.fleetnode/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                Config::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: FLEETNODE_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FLEETNODE_NODE_NAME") {
            self.node.name = val;
        }
        if let Ok(val) = std::env::var("FLEETNODE_HTTP_HOST") {
            self.node.host = val;
        }
        if let Ok(val) = std::env::var("FLEETNODE_HTTP_PORT") {
            if let Ok(v) = val.parse() {
                self.node.port = v;
            }
        }

        if let Ok(val) = std::env::var("FLEETNODE_CLUSTER_PORT") {
            if let Ok(v) = val.parse() {
                self.cluster.bind_port = v;
            }
        }
        if let Ok(val) = std::env::var("FLEETNODE_CLUSTER_MEMBERS") {
            self.cluster.members = parse_member_list(&val);
        }

        if let Ok(val) = std::env::var("FLEETNODE_HEALTH_PORT") {
            if let Ok(v) = val.parse() {
                self.health.port = v;
            }
        }

        if let Ok(val) = std::env::var("FLEETNODE_STAGING_DIR") {
            if !val.trim().is_empty() {
                self.services.staging_dir = Some(val);
            }
        }

        if let Ok(val) = std::env::var("FLEETNODE_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node.name.trim().is_empty() {
            return Err(FleetError::Config("node.name must not be empty".into()));
        }
        if self.node.port == 0 {
            return Err(FleetError::Config("node.port must not be 0".into()));
        }
        if self.cluster.join_attempts == 0 {
            return Err(FleetError::Config(
                "cluster.join_attempts must be at least 1".into(),
            ));
        }
        if self.services.executable_marker.is_empty() {
            return Err(FleetError::Config(
                "services.executable_marker must not be empty".into(),
            ));
        }
        if self.health.interval_secs == 0 {
            return Err(FleetError::Config(
                "health.interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parent directory for package staging directories.
    pub fn staging_root(&self) -> PathBuf {
        self.services
            .staging_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl ServicesConfig {
    pub fn stability_window(&self) -> Duration {
        Duration::from_millis(self.stability_window_ms)
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl ClusterConfig {
    pub fn join_retry_delay(&self) -> Duration {
        Duration::from_secs(self.join_retry_delay_secs)
    }
}

/// Split a comma-separated peer list, dropping blanks.
pub fn parse_member_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
