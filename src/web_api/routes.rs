//! API Routes

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;

use crate::camera::SensorSettings;
use crate::error::Error;
use crate::models::CaptureRequest;
use crate::state::{AppState, NodeRole};

/// MJPEG part boundary, shared with the original streaming front-end.
const STREAM_BOUNDARY: &str = "123456789000000000000987654321";

/// Pause between streamed frames.
const STREAM_FRAME_DELAY: Duration = Duration::from_millis(20);

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::device_status))
        // Capture (master trigger / slave prepare, plus legacy alias)
        .route("/api/capture", get(capture).post(capture))
        .route("/capture", get(capture).post(capture))
        // Sensor tuning
        .route("/api/sensor", post(sensor))
        // Streaming
        .route("/api/stream/start", get(stream_start))
        .route("/api/stream/stop", get(stream_stop))
        .route("/stream", get(stream))
        .with_state(state)
}

/// Split a query/form string into ordered pairs. No percent decoding; the
/// wire vocabulary is plain ASCII tokens.
fn parse_pairs(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ========================================
// Capture Handlers
// ========================================

async fn capture(
    State(state): State<AppState>,
    RawQuery(raw_query): RawQuery,
    body: String,
) -> Response {
    // Body parameters first, then query, matching the firmware's merge.
    let mut pairs = parse_pairs(&body);
    pairs.extend(parse_pairs(raw_query.as_deref().unwrap_or("")));

    match state.config.role {
        NodeRole::Master => trigger_capture(&state, pairs).await,
        NodeRole::Slave => prepare_capture(&state, pairs).await,
    }
}

/// Master: enqueue and block until the sequence completes.
async fn trigger_capture(state: &AppState, pairs: Vec<(String, String)>) -> Response {
    if pairs.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing query").into_response();
    }
    let Some(orchestrator) = &state.orchestrator else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "capture task not ready").into_response();
    };

    let request = CaptureRequest::from_pairs(&pairs, state.config.default_frame_size);
    let outcome = match orchestrator.enqueue(request) {
        Ok(outcome) => outcome,
        Err(_) => return (StatusCode::CONFLICT, "capture busy").into_response(),
    };

    match outcome.await {
        Ok(outcome) if outcome.ok => "OK".into_response(),
        Ok(outcome) => {
            let detail = if outcome.detail.is_empty() {
                "capture timeout".to_string()
            } else {
                outcome.detail
            };
            (StatusCode::INTERNAL_SERVER_ERROR, detail).into_response()
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "capture timeout").into_response(),
    }
}

/// Slave: arm the capture slot.
async fn prepare_capture(state: &AppState, pairs: Vec<(String, String)>) -> Response {
    if pairs.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing params").into_response();
    }
    let Some(engine) = &state.engine else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "capture engine not ready").into_response();
    };

    let request = CaptureRequest::from_pairs(&pairs, state.config.default_frame_size);
    match engine.prepare(request).await {
        Ok(()) => "OK".into_response(),
        Err(Error::Busy) => (StatusCode::CONFLICT, "capture busy").into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Capture prepare failed");
            (StatusCode::CONFLICT, "capture prep failed").into_response()
        }
    }
}

// ========================================
// Sensor Handler
// ========================================

async fn sensor(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let settings = if content_type.contains("application/json") {
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => SensorSettings::from_json(&value),
            Err(_) => return (StatusCode::BAD_REQUEST, "invalid body").into_response(),
        }
    } else {
        SensorSettings::from_pairs(&parse_pairs(&body))
    };

    match state.pipeline.apply_settings(&settings).await {
        Ok(()) => "OK".into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// Stream Handlers
// ========================================

async fn stream_start(State(state): State<AppState>) -> Response {
    state.stream.enable();
    if let Some(slave) = &state.slave {
        if let Err(e) = slave.stream_cmd("/api/stream/start").await {
            tracing::warn!(error = %e, "Slave stream start failed");
        }
    }
    "OK".into_response()
}

async fn stream_stop(State(state): State<AppState>) -> Response {
    state.stream.disable();
    if let Some(slave) = &state.slave {
        if let Err(e) = slave.stream_cmd("/api/stream/stop").await {
            tracing::warn!(error = %e, "Slave stream stop failed");
        }
    }
    "OK".into_response()
}

/// MJPEG multipart stream. One client at a time; the loop checks the
/// supervisor flags between frames.
async fn stream(State(state): State<AppState>) -> Response {
    if !state.stream.is_enabled() {
        return (StatusCode::CONFLICT, "stream disabled").into_response();
    }
    let Some(guard) = state.stream.clone().begin() else {
        return (StatusCode::CONFLICT, "stream already active").into_response();
    };

    struct StreamCtx {
        state: AppState,
        _guard: crate::stream_supervisor::StreamGuard,
    }

    let ctx = StreamCtx {
        state: state.clone(),
        _guard: guard,
    };

    let parts = futures::stream::unfold(ctx, |ctx| async move {
        if !ctx.state.stream.should_continue() {
            return None;
        }
        let chunk = match ctx.state.pipeline.pull_frame().await {
            Ok(frame) => {
                let mut part = Vec::with_capacity(frame.data.len() + 128);
                part.extend_from_slice(
                    format!(
                        "--{STREAM_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                        frame.data.len()
                    )
                    .as_bytes(),
                );
                part.extend_from_slice(&frame.data);
                part.extend_from_slice(b"\r\n");
                ctx.state.pipeline.return_frame(frame).await;
                Bytes::from(part)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Camera capture failed");
                Bytes::new()
            }
        };
        tokio::time::sleep(STREAM_FRAME_DELAY).await;
        Some((Ok::<Bytes, Infallible>(chunk), ctx))
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace;boundary={STREAM_BOUNDARY}"),
        )
        .body(Body::from_stream(parts))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
