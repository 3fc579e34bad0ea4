//! HTTP server implementation using axum.

use crate::api::{
    ApiError, HealthResponse, OwnershipResponse, RegisterRequest, RegisterResponse,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use sentinel_core::{ManagedTrade, Ticket};
use sentinel_manager::AlertFlag;
use sentinel_queue::{OperationOutcome, QueueError, WriteKind, WriteQueue, DEFAULT_WAIT_TIMEOUT};
use sentinel_registry::Registry;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Facade server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeConfig {
    /// Enable the facade server.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    8090
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
        }
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    queue: WriteQueue,
    ready_rx: watch::Receiver<bool>,
    alert: Arc<AlertFlag>,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        queue: WriteQueue,
        ready_rx: watch::Receiver<bool>,
        alert: Arc<AlertFlag>,
    ) -> Self {
        Self {
            registry,
            queue,
            ready_rx,
            alert,
        }
    }

    fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/trade/register", post(register_trade))
        .route("/trade/{ticket}", get(get_trade))
        .route("/ownership/{ticket}", get(get_ownership))
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the task is dropped.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting facade server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, create_router(state)).await
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiError::new(code, message))).into_response()
}

/// POST /trade/register — idempotent registration.
async fn register_trade(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    if !state.is_ready() {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "not_ready",
            "core not yet initialized",
        );
    }

    let ticket = request.ticket;
    let position = request.into_position();
    if let Err(e) = position.validate() {
        debug!(ticket = %ticket, error = %e, "Registration rejected");
        return error_response(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string());
    }
    let trade = ManagedTrade::from_position(&position, Utc::now());

    let write = match state.queue.submit(WriteKind::RegisterTrade { trade }) {
        Ok(w) => w,
        Err(QueueError::Validation(reason)) => {
            debug!(ticket = %ticket, reason = %reason, "Registration rejected");
            return error_response(StatusCode::BAD_REQUEST, "invalid_payload", reason);
        }
        Err(e) => {
            warn!(ticket = %ticket, error = %e, "Registration enqueue failed");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "queue_unavailable",
                e.to_string(),
            );
        }
    };

    let outcome = match write.wait(DEFAULT_WAIT_TIMEOUT).await {
        Ok(o) => o,
        Err(e) => {
            warn!(ticket = %ticket, error = %e, "Registration wait failed");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "queue_unavailable",
                e.to_string(),
            );
        }
    };

    let already_registered = match outcome {
        OperationOutcome::Applied => false,
        OperationOutcome::AlreadyRegistered => true,
        other => {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "registration_failed",
                format!("{other:?}"),
            );
        }
    };

    match state.registry.get(ticket) {
        Some(trade) => Json(RegisterResponse {
            trade,
            already_registered,
        })
        .into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "registration_failed",
            "record not found after registration",
        ),
    }
}

/// GET /trade/{ticket}
async fn get_trade(State(state): State<AppState>, Path(ticket): Path<u64>) -> Response {
    let ticket = Ticket::new(ticket);
    match state.registry.get(ticket) {
        Some(trade) => Json(trade).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "unknown_ticket",
            format!("ticket {ticket} is not registered"),
        ),
    }
}

/// GET /ownership/{ticket} — cacheable for ~5s by the caller.
async fn get_ownership(State(state): State<AppState>, Path(ticket): Path<u64>) -> Response {
    let ticket = Ticket::new(ticket);
    match state.registry.ownership(ticket) {
        Some(view) => Json(OwnershipResponse::from(view)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "unknown_ticket",
            format!("ticket {ticket} is not registered"),
        ),
    }
}

/// GET /health — process-level health, always 200 once serving.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        ready: state.is_ready(),
        alert: state.alert.is_raised(),
        alert_reasons: state.alert.reasons(),
    })
}

/// GET /health/ready — 503 until the queue worker, journal replay and
/// reconciliation have all completed.
async fn health_ready(State(state): State<AppState>) -> Response {
    let ready = state.is_ready();
    let body = Json(HealthResponse {
        status: if ready { "ok" } else { "starting" }.to_string(),
        ready,
        alert: state.alert.is_raised(),
        alert_reasons: state.alert.reasons(),
    });
    if ready {
        body.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
