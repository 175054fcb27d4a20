//! Service core types.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Prefix of every generated service id.
pub const SERVICE_ID_PREFIX: &str = "svc-";

/// Number of random characters after the prefix.
pub const SERVICE_ID_LEN: usize = 6;

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Descriptive metadata read from a package's `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Version", alias = "version")]
    pub version: String,
    /// gRPC health port of this service; the agent-wide default applies when absent.
    #[serde(
        rename = "HealthPort",
        alias = "health_port",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub health_port: Option<u16>,
}

impl ServiceConfig {
    /// Parse `config.toml` bytes. Both `Name` and `Version` must be non-empty.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let config: ServiceConfig = toml::from_str(raw).map_err(|e| e.to_string())?;
        if config.name.trim().is_empty() {
            return Err("Name must not be empty".to_string());
        }
        if config.version.trim().is_empty() {
            return Err("Version must not be empty".to_string());
        }
        Ok(config)
    }
}

/// Lifecycle state of an installed service.
///
/// `Installed -> Starting -> {Running | Failed}`, `Running -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Installed,
    Starting,
    Running,
    Stopped,
    Failed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Installed => "installed",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a registry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub id: String,
    pub config: ServiceConfig,
    pub executable_path: PathBuf,
    pub status: ServiceStatus,
    /// OS pid of the live process, if any.
    pub pid: Option<u32>,
}

/// Wire shape of one `/get-status` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatusView {
    pub status: ServiceStatus,
    pub id: String,
    pub name: String,
    pub version: String,
}

impl From<&ServiceSnapshot> for ServiceStatusView {
    fn from(snapshot: &ServiceSnapshot) -> Self {
        Self {
            status: snapshot.status,
            id: snapshot.id.clone(),
            name: snapshot.config.name.clone(),
            version: snapshot.config.version.clone(),
        }
    }
}

/// Generate a fresh `svc-xxxxxx` identifier.
pub fn generate_service_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SERVICE_ID_LEN)
        .map(|_| ID_CHARSET[rng.random_range(0..ID_CHARSET.len())] as char)
        .collect();
    format!("{}{}", SERVICE_ID_PREFIX, suffix)
}
