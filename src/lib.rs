//! fleetnode - Minimal fleet node agent
//!
//! Installs zip service packages, supervises their processes, health-checks
//! them over gRPC and exposes an HTTP control surface.

pub mod cluster;
pub mod config;
pub mod error;
pub mod gateway;
pub mod services;
pub mod utils;

pub use cluster::{join_with_retry, ClusterMembership, TcpMembership};
pub use config::Config;
pub use error::{ExitReason, FleetError, Result};
pub use services::{
    HealthMonitor, Installer, PackageBuilder, ServiceConfig, ServiceRegistry, ServiceStatus,
    Supervisor,
};
