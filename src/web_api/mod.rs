//! WebAPI - HTTP endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes for capture, sensor tuning, streaming and status
//! - Request parameter parsing
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::clock;
use crate::models::{HealthResponse, StatusResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        role: state.config.role.as_str().to_string(),
    };
    Json(response)
}

/// Device status endpoint
pub async fn device_status(State(state): State<AppState>) -> impl IntoResponse {
    let (capture_ready, capture_active) = match &state.engine {
        Some(engine) => {
            let (ready, in_progress) = engine.status().await;
            (Some(ready), Some(in_progress))
        }
        None => (None, None),
    };

    let mut sys = sysinfo::System::new();
    sys.refresh_memory();

    let response = StatusResponse {
        role: state.config.role.as_str().to_string(),
        stream_enabled: state.stream.is_enabled(),
        stream_active: state.stream.is_active(),
        capture_ready,
        capture_active,
        uptime_ms: clock::monotonic_ms(),
        free_memory_bytes: sys.available_memory(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    Json(response)
}
