//! Service lifecycle: registry, package installation, process supervision
//! and health monitoring.
//!
//! ```text
//!   /install-service ──> Installer ──stage──> staging dir
//!                            │
//!                            ├──register──> ServiceRegistry <──snapshot── HealthMonitor
//!                            │                    ▲
//!                            └──start──> Supervisor ──watcher task──┘
//! ```

pub mod health;
pub mod installer;
pub mod package;
pub mod registry;
pub mod supervisor;
pub mod types;

pub use health::{
    GrpcHealthProbe, HealthMonitor, HealthProbe, ProbeError, ProbeOutcome, ProbeTarget,
    ServingStatus, TickReport,
};
pub use installer::Installer;
pub use package::PackageBuilder;
pub use registry::{ServiceRecord, ServiceRegistry};
pub use supervisor::{ProcessHandle, Supervisor};
pub use types::{
    generate_service_id, ServiceConfig, ServiceSnapshot, ServiceStatus, ServiceStatusView,
};
