//! HTTP control surface.
//!
//! | Method | Path               | Success                   | Failure |
//! |--------|--------------------|---------------------------|---------|
//! | POST   | `/install-service` | `200` id as text          | `500`   |
//! | POST   | `/stop-service`    | `200` empty               | `400`   |
//! | POST   | `/start-service`   | `200` empty               | `400`   |
//! | GET    | `/get-status`      | `200` JSON array/sentinel | -       |
//!
//! Error bodies are plain text carrying the error message.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::FleetError;
use crate::services::{Installer, ServiceRegistry, ServiceStatusView, Supervisor};

/// Body of `/get-status` when nothing is installed.
pub const NO_SERVICES: &str = "No services installed";

/// Shared handles for the request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: ServiceRegistry,
    pub supervisor: Supervisor,
    pub installer: Arc<Installer>,
}

impl AppState {
    pub fn new(installer: Installer, supervisor: Supervisor) -> Self {
        Self {
            registry: supervisor.registry().clone(),
            supervisor,
            installer: Arc::new(installer),
        }
    }
}

/// Build the control surface router.
pub fn router(state: AppState, max_package_bytes: usize) -> Router {
    Router::new()
        .route("/install-service", post(install_service))
        .route("/stop-service", post(stop_service))
        .route("/start-service", post(start_service))
        .route("/get-status", get(get_status))
        .layer(DefaultBodyLimit::max(max_package_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Plain-text error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

impl IdQuery {
    fn require(self) -> Result<String, ApiError> {
        self.id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("missing required query parameter: id"))
    }
}

async fn install_service(State(state): State<AppState>, body: Bytes) -> Result<String, ApiError> {
    let size = body.len();
    match state.installer.install(body.to_vec()).await {
        Ok(id) => {
            info!(service_id = %id, bytes = size, "Install request succeeded");
            Ok(id)
        }
        Err(e) => {
            match e.installed_id() {
                Some(id) => warn!(service_id = %id, error = %e, "Installed service failed to start"),
                None => warn!(bytes = size, error = %e, "Install request rejected"),
            }
            Err(ApiError::internal(e.to_string()))
        }
    }
}

async fn stop_service(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<StatusCode, ApiError> {
    let id = query.require()?;
    state.supervisor.stop(&id).await.map_err(|e| {
        if e.is_client_error() {
            warn!(service_id = %id, error = %e, "Stop request rejected");
        } else {
            error!(service_id = %id, error = %e, "Failed to stop service");
        }
        stop_failure(e)
    })?;
    Ok(StatusCode::OK)
}

async fn start_service(
    State(state): State<AppState>,
    Query(query): Query<IdQuery>,
) -> Result<StatusCode, ApiError> {
    let id = query.require()?;
    // Any failure to start is reported as a bad request, whatever its cause.
    state.supervisor.start(&id).await.map_err(|e| {
        warn!(service_id = %id, error = %e, "Start request failed");
        ApiError::bad_request(e.to_string())
    })?;
    Ok(StatusCode::OK)
}

async fn get_status(State(state): State<AppState>) -> Response {
    let services = state.registry.list_all().await;
    if services.is_empty() {
        return NO_SERVICES.into_response();
    }
    let views: Vec<ServiceStatusView> = services.iter().map(ServiceStatusView::from).collect();
    Json(views).into_response()
}

/// Every stop failure is a bad request, kill errors included.
fn stop_failure(e: FleetError) -> ApiError {
    ApiError::bad_request(e.to_string())
}
