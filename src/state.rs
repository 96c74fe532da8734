//! Application state
//!
//! Holds configuration and all shared components

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::camera::{CameraPipeline, FrameSize};
use crate::capture_engine::CaptureEngine;
use crate::capture_orchestrator::CaptureOrchestrator;
use crate::slave_gateway::SlaveGateway;
use crate::storage::ArtifactStore;
use crate::stream_supervisor::StreamSupervisor;

/// Which endpoint this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Slave,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Slave => "slave",
        }
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "slave" => Ok(NodeRole::Slave),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Endpoint role
    pub role: NodeRole,
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// Slave address for control traffic (master side)
    pub slave_host: String,
    /// Slave HTTP port (master side)
    pub slave_http_port: u16,
    /// Artifact directory
    pub capture_dir: PathBuf,
    /// Streaming default resolution
    pub default_frame_size: FrameSize,
    /// Safety margin base S in milliseconds
    pub sync_safety_ms: i64,
    /// Clock probe ping count K
    pub sync_udp_pings: u32,
    /// UDP control/probe port
    pub sync_udp_port: u16,
    /// Warm-up frames dropped after reconfiguration
    pub drop_frames: u32,
    /// Fixed settle wait after the slave-prepare HTTP call
    pub slave_prepare_delay_ms: u64,
    /// AWAIT_SLAVE_READY total timeout
    pub slave_ready_timeout_ms: u64,
    /// AWAIT_SLAVE_READY poll interval
    pub slave_ready_poll_ms: u64,
    /// START retry attempts
    pub sync_start_retries: u32,
    /// Delay between START retries
    pub sync_start_retry_delay_ms: u64,
    /// Capture alone when the slave is unreachable
    pub allow_slave_missing: bool,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for AppConfig {
    fn default() -> Self {
        let role = std::env::var("ROLE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(NodeRole::Master);
        // The original endpoints stream at different defaults: master VGA,
        // slave SVGA.
        let default_frame_size = match std::env::var("DEFAULT_FRAMESIZE") {
            Ok(v) => FrameSize::parse(&v),
            Err(_) => match role {
                NodeRole::Master => FrameSize::Vga,
                NodeRole::Slave => FrameSize::Svga,
            },
        };
        Self {
            role,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080),
            slave_host: std::env::var("SLAVE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            slave_http_port: env_parse("SLAVE_HTTP_PORT", 8080),
            capture_dir: std::env::var("CAPTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/capsync/capture")),
            default_frame_size,
            sync_safety_ms: env_parse("CAPSEQ_SYNC_SAFETY_MS", 1000),
            sync_udp_pings: env_parse("CAPSEQ_SYNC_UDP_PINGS", 5),
            sync_udp_port: env_parse("CAPSEQ_SYNC_UDP_PORT", 65),
            drop_frames: env_parse("CAPSEQ_DROP_FRAMES", 5),
            slave_prepare_delay_ms: env_parse("CAPSEQ_SLAVE_PREPARE_DELAY_MS", 3000),
            slave_ready_timeout_ms: env_parse("CAPSEQ_SLAVE_READY_TIMEOUT_MS", 5000),
            slave_ready_poll_ms: env_parse("CAPSEQ_SLAVE_READY_POLL_MS", 200),
            sync_start_retries: env_parse("CAPSEQ_SYNC_START_RETRIES", 3),
            sync_start_retry_delay_ms: env_parse("CAPSEQ_SYNC_START_RETRY_DELAY_MS", 100),
            allow_slave_missing: env_parse("CAPSEQ_ALLOW_SLAVE_MISSING", false),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Camera pipeline
    pub pipeline: Arc<CameraPipeline>,
    /// Stream supervisor
    pub stream: Arc<StreamSupervisor>,
    /// Artifact store
    pub store: Arc<ArtifactStore>,
    /// Capture orchestrator (master role)
    pub orchestrator: Option<Arc<CaptureOrchestrator>>,
    /// Capture engine (slave role)
    pub engine: Option<Arc<CaptureEngine>>,
    /// Slave HTTP adapter (master role)
    pub slave: Option<Arc<SlaveGateway>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!("MASTER".parse::<NodeRole>().unwrap(), NodeRole::Master);
        assert_eq!("slave".parse::<NodeRole>().unwrap(), NodeRole::Slave);
        assert!("observer".parse::<NodeRole>().is_err());
    }
}
