//! Capsync Camserver Library
//!
//! Dual-endpoint synchronized camera capture: two networked endpoints
//! (master and slave) trigger their sensors at aligned instants despite
//! network jitter and unsynchronized monotonic clocks.
//!
//! ## Architecture
//!
//! 1. CameraPipeline - format-aware sensor/DMA lifecycle
//! 2. ClockProbe - trip time and clock disparity measurement
//! 3. SlaveControlClient - READY/START control datagrams (master)
//! 4. SlaveSyncServer - UDP control endpoint (slave)
//! 5. CaptureOrchestrator - queued capture sequencer (master)
//! 6. CaptureEngine - prepared-then-armed executor (slave)
//! 7. StreamSupervisor - MJPEG streaming control
//! 8. ArtifactStore - raw frame persistence
//! 9. SlaveGateway - slave HTTP adapter (master)
//! 10. WebAPI - HTTP endpoints
//!
//! ## Design Principles
//!
//! - Handlers are thin producers; one capture task owns the camera during
//!   a capture
//! - Pixel-format changes always pass through full deinit + power-cycle
//! - The slot/queue state machines are explicit and testable without HTTP

pub mod camera;
pub mod capture_engine;
pub mod capture_orchestrator;
pub mod clock;
pub mod clock_probe;
pub mod error;
pub mod models;
pub mod slave_gateway;
pub mod state;
pub mod storage;
pub mod stream_supervisor;
pub mod sync_client;
pub mod sync_server;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
