//! Integration tests for fleetnode
//!
//! These tests run the HTTP control surface on a real socket and drive it
//! with an HTTP client, installing packages whose executables are small
//! shell scripts.

use std::path::Path;
use std::time::Duration;

use fleetnode::{
    gateway::{self, AppState, NO_SERVICES},
    services::{
        HealthMonitor, HealthProbe, Installer, PackageBuilder, ProbeError, ProbeTarget,
        ServiceRegistry, ServiceStatus, ServiceStatusView, ServingStatus, Supervisor,
    },
    FleetError,
};
use tempfile::tempdir;

const GREET_CONFIG: &str = "Name = \"greet\"\nVersion = \"1.0\"\n";

/// Start an agent on an ephemeral port with the default stability window.
async fn start_agent(staging: &Path) -> (String, Supervisor) {
    let supervisor = Supervisor::new(ServiceRegistry::new());
    let installer = Installer::new(supervisor.clone(), staging);
    let app = gateway::router(AppState::new(installer, supervisor.clone()), 1 << 20);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), supervisor)
}

fn package(executable: &str, script: &str) -> Vec<u8> {
    PackageBuilder::new()
        .file("config.toml", GREET_CONFIG)
        .file(executable, format!("#!/bin/sh\n{}\n", script))
        .build()
        .unwrap()
}

async fn install(base: &str, archive: Vec<u8>) -> (u16, String) {
    let response = reqwest::Client::new()
        .post(format!("{}/install-service", base))
        .body(archive)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

async fn status_views(base: &str) -> Vec<ServiceStatusView> {
    let body = reqwest::get(format!("{}/get-status", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    if body == NO_SERVICES {
        return Vec::new();
    }
    serde_json::from_str(&body).unwrap()
}

// ============================================================================
// Install / Status
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_install_long_running_service_reports_running() {
    let staging = tempdir().unwrap();
    let (base, supervisor) = start_agent(staging.path()).await;

    let (status, id) = install(&base, package("greet.exe", "sleep 10")).await;
    assert_eq!(status, 200, "body: {}", id);
    assert!(id.starts_with("svc-"));
    assert_eq!(id.len(), "svc-".len() + 6);

    let views = status_views(&base).await;
    let view = views.iter().find(|v| v.id == id).unwrap();
    assert_eq!(view.status, ServiceStatus::Running);
    assert_eq!(view.name, "greet");
    assert_eq!(view.version, "1.0");

    supervisor.stop_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_install_crashing_service_is_500_and_never_running() {
    let staging = tempdir().unwrap();
    let (base, _supervisor) = start_agent(staging.path()).await;

    let (status, body) = install(&base, package("crash.exe", "echo dying >&2; exit 1")).await;
    assert_eq!(status, 500);
    assert!(body.contains("exit status 1"), "body: {}", body);
    assert!(body.contains("dying"));

    for view in status_views(&base).await {
        assert_ne!(view.status, ServiceStatus::Running);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_installs_get_distinct_ids() {
    let staging = tempdir().unwrap();
    let (base, supervisor) = start_agent(staging.path()).await;

    let (first_status, first) = install(&base, package("greet.exe", "sleep 10")).await;
    let (second_status, second) = install(&base, package("greet.exe", "sleep 10")).await;
    assert_eq!((first_status, second_status), (200, 200));
    assert_ne!(first, second);
    assert_eq!(status_views(&base).await.len(), 2);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_rejected_packages_leave_registry_unchanged() {
    let staging = tempdir().unwrap();
    let (base, _supervisor) = start_agent(staging.path()).await;

    let no_exe = PackageBuilder::new()
        .file("config.toml", GREET_CONFIG)
        .build()
        .unwrap();
    let two_executables = PackageBuilder::new()
        .file("config.toml", GREET_CONFIG)
        .file("a.exe", "#!/bin/sh\nsleep 10\n")
        .file("b.exe", "#!/bin/sh\nsleep 10\n")
        .build()
        .unwrap();
    let wrong_name = PackageBuilder::new()
        .file("myconfig.toml", GREET_CONFIG)
        .file("greet.exe", "#!/bin/sh\nsleep 10\n")
        .build()
        .unwrap();

    for archive in [no_exe, two_executables, wrong_name] {
        let (status, body) = install(&base, archive).await;
        assert_eq!(status, 500);
        assert!(body.contains("Invalid package"), "body: {}", body);
    }

    let (status, _) = install(&base, b"PK\x03\x04 truncated".to_vec()).await;
    assert_eq!(status, 500);

    assert!(status_views(&base).await.is_empty());
    // Every failed install cleaned up its staging directory.
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

// ============================================================================
// Stop / Start
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_stop_then_stop_again() {
    let staging = tempdir().unwrap();
    let (base, _supervisor) = start_agent(staging.path()).await;
    let (_, id) = install(&base, package("greet.exe", "sleep 10")).await;

    let client = reqwest::Client::new();
    let stop = format!("{}/stop-service?id={}", base, id);

    let first = client.post(&stop).send().await.unwrap();
    assert_eq!(first.status().as_u16(), 200);

    let second = client.post(&stop).send().await.unwrap();
    assert_eq!(second.status().as_u16(), 400);
    assert!(second.text().await.unwrap().contains("no live process"));

    let views = status_views(&base).await;
    assert_eq!(views[0].status, ServiceStatus::Stopped);
}

#[tokio::test]
async fn test_stop_and_start_unknown_id() {
    let staging = tempdir().unwrap();
    let (base, _supervisor) = start_agent(staging.path()).await;
    let client = reqwest::Client::new();

    for path in ["stop-service", "start-service"] {
        let response = client
            .post(format!("{}/{}?id=svc-000000", base, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_failure_after_restart_is_400() {
    let staging = tempdir().unwrap();
    let (base, _supervisor) = start_agent(staging.path()).await;

    // Exits shortly after the stability window on first run, then
    // immediately on every later run.
    let script = "if [ -f ran ]; then exit 4; fi; touch ran; sleep 3";
    let (status, id) = install(&base, package("flaky.exe", script)).await;
    assert_eq!(status, 200, "body: {}", id);

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let response = reqwest::Client::new()
        .post(format!("{}/start-service?id={}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert!(response.text().await.unwrap().contains("exit status 4"));

    let views = status_views(&base).await;
    assert_eq!(views[0].status, ServiceStatus::Failed);
}

// ============================================================================
// Health monitor against installed services
// ============================================================================

struct AlwaysServing;

#[async_trait::async_trait]
impl HealthProbe for AlwaysServing {
    async fn check(&self, _target: &ProbeTarget) -> Result<ServingStatus, ProbeError> {
        Ok(ServingStatus::Serving)
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_monitor_probes_installed_running_services() {
    let staging = tempdir().unwrap();
    let registry = ServiceRegistry::new();
    let supervisor =
        Supervisor::new(registry.clone()).with_stability_window(Duration::from_millis(300));
    let installer = Installer::new(supervisor.clone(), staging.path());

    let running = installer
        .install(package("greet.exe", "sleep 10"))
        .await
        .unwrap();
    let failed = installer
        .install(package("crash.exe", "exit 0"))
        .await
        .unwrap_err();
    assert!(matches!(failed, FleetError::Startup { .. }));

    let monitor = HealthMonitor::new(registry, std::sync::Arc::new(AlwaysServing));
    let report = monitor.tick().await;
    assert_eq!(report.probed(), 1);
    assert!(report.outcome(&running).unwrap().is_healthy());
    assert!(report.outcome(failed.installed_id().unwrap()).is_none());

    supervisor.stop_all().await;
}
