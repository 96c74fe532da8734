//! Shared models and types
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::camera::{FrameSize, PixelFormat, SensorSettings};

/// Session identifiers are truncated to this many characters.
pub const SESSION_MAX_LEN: usize = 31;

/// Diagnostic strings are truncated to this many characters.
pub const DETAIL_MAX_LEN: usize = 63;

/// One accepted capture request. Immutable for its lifetime; helpers only
/// ever see borrows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub session: String,
    pub frame_count: u32,
    pub frame_size: FrameSize,
    pub pixel_format: PixelFormat,
    /// Safety-margin override in microseconds (`cpu_time_to_start` ms on
    /// the wire).
    pub start_overhead_us: Option<i64>,
    pub tuning: SensorSettings,
}

impl CaptureRequest {
    /// Build a request from ordered key/value pairs (query string or form
    /// body). Unrecognized keys become sensor tuning entries; recognized
    /// ones are parsed with the firmware's fallbacks.
    pub fn from_pairs(pairs: &[(String, String)], default_size: FrameSize) -> Self {
        let mut session = String::from("session");
        let mut frame_count: u32 = 1;
        let mut frame_size = default_size;
        let mut pixel_format = PixelFormat::Jpeg;
        let mut start_overhead_us = None;
        let mut tuning = SensorSettings::new();

        for (key, value) in pairs {
            match key.as_str() {
                "session" => {
                    session = value.chars().take(SESSION_MAX_LEN).collect();
                }
                "frame_count" => {
                    frame_count = value.parse::<u32>().unwrap_or(0).max(1);
                }
                "framesize" => {
                    frame_size = FrameSize::parse(value);
                    tuning.push("framesize", frame_size.index() as i32);
                }
                "pixel_format" => {
                    pixel_format = PixelFormat::parse(value);
                }
                "cpu_time_to_start" => {
                    if let Ok(ms) = value.parse::<i64>() {
                        if ms > 0 {
                            start_overhead_us = Some(ms * 1000);
                        }
                    }
                }
                _ => {
                    if let Ok(v) = value.parse::<i32>() {
                        tuning.push(key.clone(), v);
                    }
                }
            }
        }

        Self {
            session,
            frame_count,
            frame_size,
            pixel_format,
            start_overhead_us,
            tuning,
        }
    }

    /// Flatten back into wire pairs for the slave's prepare endpoint.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("session".to_string(), self.session.clone()),
            ("frame_count".to_string(), self.frame_count.to_string()),
            ("framesize".to_string(), self.frame_size.as_str().to_string()),
            (
                "pixel_format".to_string(),
                self.pixel_format.as_str().to_string(),
            ),
        ];
        for (key, value) in self.tuning.iter() {
            if key != "framesize" {
                params.push((key.to_string(), value.to_string()));
            }
        }
        params
    }
}

/// Result of one capture sequence, returned synchronously to the requester.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub ok: bool,
    pub detail: String,
    pub artifacts: Vec<PathBuf>,
}

impl CaptureOutcome {
    pub fn success(artifacts: Vec<PathBuf>) -> Self {
        Self {
            ok: true,
            detail: String::new(),
            artifacts,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        let mut detail: String = detail.into();
        detail.truncate(DETAIL_MAX_LEN);
        Self {
            ok: false,
            detail,
            artifacts: Vec::new(),
        }
    }
}

/// `/api/status` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub role: String,
    pub stream_enabled: bool,
    pub stream_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_ready: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_active: Option<bool>,
    pub uptime_ms: i64,
    pub free_memory_bytes: u64,
    pub timestamp: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub role: String,
}
