//! Serve command handler (the node agent itself).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use fleetnode::cluster::{join_with_retry, ClusterMembership, TcpMembership};
use fleetnode::config::Config;
use fleetnode::gateway::{self, AppState};
use fleetnode::services::{GrpcHealthProbe, HealthMonitor, Installer, ServiceRegistry, Supervisor};

/// Run the agent until Ctrl+C.
pub(crate) async fn cmd_serve(config_path: &Path) -> Result<()> {
    let config = Config::load_from_path(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    println!("Starting fleetnode agent '{}'...", config.node.name);

    // Cluster membership: joining is required when peers are configured.
    let (membership, membership_task) = TcpMembership::bind(
        config.node.name.clone(),
        (config.node.host.as_str(), config.cluster.bind_port),
    )
    .await
    .with_context(|| "Failed to start cluster membership")?;
    join_with_retry(
        &membership,
        &config.cluster.members,
        config.cluster.join_attempts,
        config.cluster.join_retry_delay(),
    )
    .await
    .with_context(|| "Failed to join cluster")?;
    info!(members = ?membership.members().await, "Cluster membership ready");

    // Service lifecycle
    let registry = ServiceRegistry::new();
    let supervisor = Supervisor::new(registry.clone())
        .with_stability_window(config.services.stability_window())
        .with_capture_bytes(config.services.output_capture_bytes);
    let installer = Installer::new(supervisor.clone(), config.staging_root())
        .with_executable_marker(config.services.executable_marker.clone());

    // Health monitor
    let (monitor_shutdown_tx, monitor_shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor_handle = if config.health.enabled {
        let probe = Arc::new(GrpcHealthProbe::new(config.health.probe_timeout()));
        let monitor = HealthMonitor::new(registry.clone(), probe)
            .with_interval(config.health.interval())
            .with_probe_timeout(config.health.probe_timeout())
            .with_endpoint(config.health.host.clone(), config.health.port);
        Some(monitor.spawn(monitor_shutdown_rx))
    } else {
        info!("Health monitor disabled");
        None
    };

    // HTTP control surface
    let app = gateway::router(
        AppState::new(installer, supervisor.clone()),
        config.services.max_package_bytes,
    );
    let listener = tokio::net::TcpListener::bind((config.node.host.as_str(), config.node.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind control surface on {}:{}",
                config.node.host, config.node.port
            )
        })?;
    info!(addr = %listener.local_addr()?, "Control surface listening");

    println!();
    println!("Agent is running. Press Ctrl+C to stop.");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "HTTP server error")?;

    println!();
    println!("Shutting down...");

    let _ = monitor_shutdown_tx.send(true);
    if let Some(handle) = monitor_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    supervisor.stop_all().await;
    membership_task.abort();

    println!("Agent stopped.");
    Ok(())
}

/// Resolve on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the agent runs until killed.
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
