//! REST gateway for VMware vCenter
//!
//! Provides REST endpoints for:
//! - Inventory: flat VM listing, datacenter/folder/pool hierarchy, per-VM details
//! - Power: start, shutdown, restart, poweroff by VM name

pub mod config;
pub mod dto;
pub mod handlers;
pub mod response;
pub mod routes;

use std::any::Any;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcenter::InventoryClient;

pub use config::Config;
pub use dto::*;
pub use response::{ApiError, ApiResult, ErrorBody};

// =============================================================================
// Tracing Initialization
// =============================================================================

/// Initialize tracing/logging with the given filter level
pub fn init_tracing(filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Shared State
// =============================================================================

pub struct AppState {
    pub client: InventoryClient,
    /// Cancelled on server shutdown; power task waits derive from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(client: InventoryClient) -> Self {
        Self {
            client,
            shutdown: CancellationToken::new(),
        }
    }
}

pub type SharedState = Arc<AppState>;

// =============================================================================
// Router
// =============================================================================

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(routes::vm_routes())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: format!("An error occurred: {}", detail),
        }),
    )
        .into_response()
}

// =============================================================================
// Root Endpoints
// =============================================================================

async fn root() -> &'static str {
    "vCenter VM Gateway - Use /vms, /vms_structure, /vm_details or /vms/power"
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
