//! Route API - HTTP producer of route-lifecycle events.
//!
//! Exposes four routes:
//! - `PUT /api/routes/:namespace/:name` - create or update a route
//! - `DELETE /api/routes/:namespace/:name` - remove a route
//! - `GET /api/routes` - list active routes with delivery statistics
//! - `GET /health` - liveness

use crate::error::BridgeError;
use crate::manager::{RouteHandle, RouteSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, put},
    Router,
};
use brokerchannel::route::DEFAULT_BROKER_PORT;
use brokerchannel::{Route, RouteEvent, RouteId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared state for the route API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub routes: RouteHandle,
    pub snapshots: watch::Receiver<Vec<RouteSnapshot>>,
}

/// Request body for `PUT /api/routes/:namespace/:name`.
#[derive(Deserialize)]
pub struct PutRouteRequest {
    pub broker_address: String,
    pub broker_port: Option<u16>,
    pub topic: String,
    pub sink_url: String,
}

/// A single entry in the `GET /api/routes` response.
#[derive(Serialize)]
pub struct RouteInfo {
    pub namespace: String,
    pub name: String,
    pub broker_address: String,
    pub broker_port: u16,
    pub topic: String,
    pub sink_url: String,
    pub session_id: Uuid,
    pub delivered: u64,
    pub undelivered: u64,
    /// Publishes dropped because delivery fell behind
    pub dropped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Serialize)]
pub struct ListRoutesResponse {
    pub routes: Vec<RouteInfo>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn put_route(
    State(state): State<Arc<ApiState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<PutRouteRequest>,
) -> Result<StatusCode, AppError> {
    let route = Route {
        namespace,
        name,
        broker_address: req.broker_address,
        broker_port: req.broker_port.unwrap_or(DEFAULT_BROKER_PORT),
        topic: req.topic,
        sink_url: req.sink_url,
    };
    let id = route.id();

    state.routes.submit(RouteEvent::Updated(route)).await?;

    info!(route = %id, "Route applied via API");
    Ok(StatusCode::OK)
}

async fn delete_route(
    State(state): State<Arc<ApiState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let id = RouteId::new(namespace, name);

    state.routes.submit(RouteEvent::Deleted(id.clone())).await?;

    info!(route = %id, "Route deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_routes(State(state): State<Arc<ApiState>>) -> Json<ListRoutesResponse> {
    let snapshot = state.snapshots.borrow().clone();

    let mut routes = Vec::with_capacity(snapshot.len());
    for entry in snapshot {
        let status = entry.status.lock().await.clone();
        let route = entry.route;
        routes.push(RouteInfo {
            namespace: route.namespace,
            name: route.name,
            broker_address: route.broker_address,
            broker_port: route.broker_port,
            topic: route.topic,
            sink_url: route.sink_url,
            session_id: entry.session_id,
            delivered: status.delivered_count,
            undelivered: status.undelivered_count,
            dropped: entry.dropped.load(Ordering::Relaxed),
            last_delivery: status.last_delivery.map(|dt| dt.to_rfc3339()),
            last_error: status.last_error,
        });
    }

    Json(ListRoutesResponse { routes })
}

async fn health() -> &'static str {
    "OK"
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

struct AppError(BridgeError);

impl From<BridgeError> for AppError {
    fn from(e: BridgeError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BridgeError::InvalidRoute { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Connect { .. } | BridgeError::Subscribe { .. } => StatusCode::BAD_GATEWAY,
            BridgeError::ManagerStopped => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::ShutdownIncomplete { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "Route API request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/routes", get(list_routes))
        .route(
            "/api/routes/:namespace/:name",
            put(put_route).delete(delete_route),
        )
        .with_state(Arc::new(state))
}
