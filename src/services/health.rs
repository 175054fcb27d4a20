//! Periodic health monitor for running services.
//!
//! Every tick the monitor snapshots the registry and probes each `Running`
//! service through the standard `grpc.health.v1.Health/Check` call. Probes
//! run concurrently, each under its own timeout, and the tick joins them all
//! before returning. The monitor only observes: probe results are logged and
//! reported, but never written back to the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tonic::transport::Endpoint;
use tonic_health::pb::health_check_response::ServingStatus as PbServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::{debug, error, info, warn};

use super::registry::ServiceRegistry;
use super::types::ServiceStatus;

/// Default period between probe rounds.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Serving status reported by a service's health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    Serving,
    NotServing,
    Unknown,
}

/// Why a probe produced no serving status.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("health call failed: {0}")]
    Call(String),
}

/// Where to probe one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A single remote health check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, target: &ProbeTarget) -> Result<ServingStatus, ProbeError>;
}

/// Probe over gRPC using the standard health service.
#[derive(Debug, Clone)]
pub struct GrpcHealthProbe {
    timeout: Duration,
}

impl GrpcHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for GrpcHealthProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl HealthProbe for GrpcHealthProbe {
    async fn check(&self, target: &ProbeTarget) -> Result<ServingStatus, ProbeError> {
        let channel = Endpoint::from_shared(target.uri())
            .map_err(|e| ProbeError::Connect(e.to_string()))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect()
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        let mut client = HealthClient::new(channel);
        let response = client
            .check(HealthCheckRequest {
                service: String::new(),
            })
            .await
            .map_err(|status| ProbeError::Call(status.message().to_string()))?;

        Ok(match response.into_inner().status() {
            PbServingStatus::Serving => ServingStatus::Serving,
            PbServingStatus::NotServing => ServingStatus::NotServing,
            PbServingStatus::Unknown | PbServingStatus::ServiceUnknown => ServingStatus::Unknown,
        })
    }
}

/// Result of probing one service during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Serving,
    NotServing,
    Unknown,
    /// Could not connect to the health endpoint.
    Unreachable(String),
    /// Connected, but the health call itself failed.
    CallFailed(String),
    TimedOut,
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Serving)
    }
}

/// Outcome of one probe round.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub results: Vec<(String, ProbeOutcome)>,
}

impl TickReport {
    pub fn probed(&self) -> usize {
        self.results.len()
    }

    pub fn healthy(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_healthy()).count()
    }

    pub fn outcome(&self, service_id: &str) -> Option<&ProbeOutcome> {
        self.results
            .iter()
            .find(|(id, _)| id == service_id)
            .map(|(_, outcome)| outcome)
    }
}

/// Background loop probing every running service.
#[derive(Clone)]
pub struct HealthMonitor {
    registry: ServiceRegistry,
    probe: Arc<dyn HealthProbe>,
    interval: Duration,
    probe_timeout: Duration,
    host: String,
    default_port: u16,
}

impl HealthMonitor {
    pub fn new(registry: ServiceRegistry, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            registry,
            probe,
            interval: DEFAULT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            host: "127.0.0.1".to_string(),
            default_port: 50051,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Host and fallback port of the services' health endpoints.
    pub fn with_endpoint(mut self, host: impl Into<String>, default_port: u16) -> Self {
        self.host = host.into();
        self.default_port = default_port;
        self
    }

    /// Run one probe round over the current `Running` services.
    pub async fn tick(&self) -> TickReport {
        let targets: Vec<ProbeTarget> = self
            .registry
            .list_all()
            .await
            .into_iter()
            .filter(|s| s.status == ServiceStatus::Running)
            .map(|s| ProbeTarget {
                port: s.config.health_port.unwrap_or(self.default_port),
                name: s.config.name,
                service_id: s.id,
                host: self.host.clone(),
            })
            .collect();

        if targets.is_empty() {
            debug!("Health tick: no running services");
            return TickReport::default();
        }

        let probes = targets.iter().map(|target| self.probe_one(target));
        let outcomes = join_all(probes).await;

        let results: Vec<(String, ProbeOutcome)> = targets
            .into_iter()
            .map(|t| t.service_id)
            .zip(outcomes)
            .collect();
        let report = TickReport { results };
        debug!(
            probed = report.probed(),
            healthy = report.healthy(),
            "Health tick complete"
        );
        report
    }

    async fn probe_one(&self, target: &ProbeTarget) -> ProbeOutcome {
        let outcome = match tokio::time::timeout(self.probe_timeout, self.probe.check(target)).await
        {
            Ok(Ok(ServingStatus::Serving)) => ProbeOutcome::Serving,
            Ok(Ok(ServingStatus::NotServing)) => ProbeOutcome::NotServing,
            Ok(Ok(ServingStatus::Unknown)) => ProbeOutcome::Unknown,
            Ok(Err(ProbeError::Connect(e))) => ProbeOutcome::Unreachable(e),
            Ok(Err(ProbeError::Call(e))) => ProbeOutcome::CallFailed(e),
            Err(_) => ProbeOutcome::TimedOut,
        };

        match &outcome {
            ProbeOutcome::Serving => {
                debug!(service_id = %target.service_id, name = %target.name, "Service is serving")
            }
            ProbeOutcome::NotServing | ProbeOutcome::Unknown => warn!(
                service_id = %target.service_id,
                name = %target.name,
                outcome = ?outcome,
                "Service is not serving"
            ),
            ProbeOutcome::Unreachable(e) => error!(
                service_id = %target.service_id,
                endpoint = %target.uri(),
                error = %e,
                "Failed to connect to service health endpoint"
            ),
            ProbeOutcome::CallFailed(e) => error!(
                service_id = %target.service_id,
                endpoint = %target.uri(),
                error = %e,
                "Health check call failed"
            ),
            ProbeOutcome::TimedOut => warn!(
                service_id = %target.service_id,
                endpoint = %target.uri(),
                timeout_ms = self.probe_timeout.as_millis() as u64,
                "Health check timed out"
            ),
        }
        outcome
    }

    /// Tick until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Health monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Health monitor stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::ServiceRecord;
    use crate::services::types::ServiceConfig;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock probe answering from a per-port script.
    struct MockProbe {
        answers: HashMap<u16, MockAnswer>,
        calls: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum MockAnswer {
        Status(ServingStatus),
        Refuse,
        Hang,
    }

    impl MockProbe {
        fn new(answers: &[(u16, MockAnswer)]) -> Arc<Self> {
            Arc::new(Self {
                answers: answers.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for MockProbe {
        async fn check(&self, target: &ProbeTarget) -> Result<ServingStatus, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answers.get(&target.port).copied() {
                Some(MockAnswer::Status(s)) => Ok(s),
                Some(MockAnswer::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(ServingStatus::Serving)
                }
                Some(MockAnswer::Refuse) | None => {
                    Err(ProbeError::Connect("connection refused".into()))
                }
            }
        }
    }

    async fn add_service(
        registry: &ServiceRegistry,
        id: &str,
        port: u16,
        status: ServiceStatus,
    ) {
        registry
            .register(ServiceRecord::new(
                id.to_string(),
                ServiceConfig {
                    name: id.to_string(),
                    version: "1".into(),
                    health_port: Some(port),
                },
                PathBuf::from("/bin/true"),
            ))
            .await
            .unwrap();
        if status == ServiceStatus::Running {
            registry.simulate_running(id).await;
        } else {
            registry.update_status(id, status).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_tick_probes_only_running_services() {
        let registry = ServiceRegistry::new();
        add_service(&registry, "svc-run000", 9001, ServiceStatus::Running).await;
        add_service(&registry, "svc-stop00", 9002, ServiceStatus::Stopped).await;
        add_service(&registry, "svc-fail00", 9003, ServiceStatus::Failed).await;

        let probe = MockProbe::new(&[
            (9001, MockAnswer::Status(ServingStatus::Serving)),
            (9002, MockAnswer::Status(ServingStatus::Serving)),
        ]);
        let monitor = HealthMonitor::new(registry, probe.clone());
        let report = monitor.tick().await;

        assert_eq!(report.probed(), 1);
        assert_eq!(report.outcome("svc-run000"), Some(&ProbeOutcome::Serving));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tick_isolates_failures() {
        let registry = ServiceRegistry::new();
        add_service(&registry, "svc-a00000", 9001, ServiceStatus::Running).await;
        add_service(&registry, "svc-b00000", 9002, ServiceStatus::Running).await;
        add_service(&registry, "svc-c00000", 9003, ServiceStatus::Running).await;

        let probe = MockProbe::new(&[
            (9001, MockAnswer::Refuse),
            (9002, MockAnswer::Status(ServingStatus::NotServing)),
            (9003, MockAnswer::Status(ServingStatus::Serving)),
        ]);
        let report = HealthMonitor::new(registry.clone(), probe).tick().await;

        assert_eq!(report.probed(), 3);
        assert_eq!(report.healthy(), 1);
        assert!(matches!(
            report.outcome("svc-a00000"),
            Some(ProbeOutcome::Unreachable(_))
        ));
        assert_eq!(
            report.outcome("svc-b00000"),
            Some(&ProbeOutcome::NotServing)
        );

        // Observational only: statuses are untouched.
        for snapshot in registry.list_all().await {
            assert_eq!(snapshot.status, ServiceStatus::Running);
        }
    }

    #[tokio::test]
    async fn test_slow_probes_do_not_serialize() {
        let registry = ServiceRegistry::new();
        for (i, port) in (9101..9105).enumerate() {
            add_service(
                &registry,
                &format!("svc-hang{:02}", i),
                port,
                ServiceStatus::Running,
            )
            .await;
        }
        let probe = MockProbe::new(&[
            (9101, MockAnswer::Hang),
            (9102, MockAnswer::Hang),
            (9103, MockAnswer::Hang),
            (9104, MockAnswer::Hang),
        ]);
        let monitor =
            HealthMonitor::new(registry, probe).with_probe_timeout(Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        let report = monitor.tick().await;
        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(report.probed(), 4);
        assert!(report
            .results
            .iter()
            .all(|(_, o)| *o == ProbeOutcome::TimedOut));
    }

    #[tokio::test]
    async fn test_default_port_applies_without_health_port() {
        let registry = ServiceRegistry::new();
        registry
            .register(ServiceRecord::new(
                "svc-noport".into(),
                ServiceConfig {
                    name: "plain".into(),
                    version: "1".into(),
                    health_port: None,
                },
                PathBuf::from("/bin/true"),
            ))
            .await
            .unwrap();
        registry.simulate_running("svc-noport").await;

        let probe = MockProbe::new(&[(50051, MockAnswer::Status(ServingStatus::Unknown))]);
        let report = HealthMonitor::new(registry, probe).tick().await;
        assert_eq!(report.outcome("svc-noport"), Some(&ProbeOutcome::Unknown));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let registry = ServiceRegistry::new();
        add_service(&registry, "svc-loop00", 9201, ServiceStatus::Running).await;
        let probe = MockProbe::new(&[(9201, MockAnswer::Status(ServingStatus::Serving))]);

        let (tx, rx) = watch::channel(false);
        let handle = HealthMonitor::new(registry, probe.clone())
            .with_interval(Duration::from_millis(50))
            .spawn(rx);

        tokio::time::sleep(Duration::from_millis(180)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(probe.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_grpc_probe_unreachable() {
        // Nothing listens on port 1 locally.
        let probe = GrpcHealthProbe::new(Duration::from_millis(300));
        let target = ProbeTarget {
            service_id: "svc-nobody".into(),
            name: "nobody".into(),
            host: "127.0.0.1".into(),
            port: 1,
        };
        assert!(matches!(
            probe.check(&target).await,
            Err(ProbeError::Connect(_))
        ));
    }

    /// Serve `grpc.health.v1` on an ephemeral port.
    async fn serve_health() -> (tonic_health::server::HealthReporter, u16) {
        let (reporter, service) = tonic_health::server::health_reporter();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let incoming = tonic::transport::server::TcpIncoming::from(listener);
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming(incoming)
                .await
                .unwrap();
        });
        (reporter, port)
    }

    #[tokio::test]
    async fn test_grpc_probe_reads_serving_status() {
        let (reporter, port) = serve_health().await;
        let probe = GrpcHealthProbe::new(Duration::from_secs(2));
        let target = ProbeTarget {
            service_id: "svc-grpc00".into(),
            name: "grpc".into(),
            host: "127.0.0.1".into(),
            port,
        };

        reporter
            .set_service_status("", tonic_health::ServingStatus::Serving)
            .await;
        assert_eq!(probe.check(&target).await.unwrap(), ServingStatus::Serving);

        reporter
            .set_service_status("", tonic_health::ServingStatus::NotServing)
            .await;
        assert_eq!(
            probe.check(&target).await.unwrap(),
            ServingStatus::NotServing
        );

        reporter
            .set_service_status("", tonic_health::ServingStatus::Unknown)
            .await;
        assert_eq!(probe.check(&target).await.unwrap(), ServingStatus::Unknown);
    }

    #[tokio::test]
    async fn test_tick_with_grpc_probe_isolates_unreachable_service() {
        let (_reporter, port) = serve_health().await;
        let registry = ServiceRegistry::new();
        add_service(&registry, "svc-live00", port, ServiceStatus::Running).await;
        add_service(&registry, "svc-dead00", 1, ServiceStatus::Running).await;

        let report = HealthMonitor::new(registry, Arc::new(GrpcHealthProbe::default()))
            .with_probe_timeout(Duration::from_secs(2))
            .tick()
            .await;

        assert_eq!(report.probed(), 2);
        assert_eq!(report.healthy(), 1);
        assert_eq!(report.outcome("svc-live00"), Some(&ProbeOutcome::Serving));
        assert!(matches!(
            report.outcome("svc-dead00"),
            Some(ProbeOutcome::Unreachable(_))
        ));
    }
}
