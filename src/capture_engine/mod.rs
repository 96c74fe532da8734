//! CaptureEngine - slave-side prepared-then-armed capture executor
//!
//! ## Responsibilities
//!
//! - The process-wide `CaptureSlot` (prepare state, exclusive with firing)
//! - Prepare: quiesce streaming, reconfigure the camera, arm the slot
//! - Fire: delay to the negotiated instant, pull and persist frames
//!
//! The slot mutex is held only across state flips, never across camera
//! work or frame pulls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::camera::{CameraPipeline, PixelFormat};
use crate::clock;
use crate::error::{Error, Result};
use crate::models::CaptureRequest;
use crate::storage::ArtifactStore;
use crate::stream_supervisor::StreamSupervisor;

/// How long prepare waits for an in-flight stream iteration to drain.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The single slave capture slot.
#[derive(Default)]
struct CaptureSlot {
    ready: bool,
    in_progress: bool,
    armed: Option<ArmedCapture>,
}

impl CaptureSlot {
    fn check_invariant(&self) {
        // ready ∧ in_progress must never hold; there is no recovery from a
        // corrupted slot on an embedded endpoint.
        assert!(
            !(self.ready && self.in_progress),
            "capture slot ready and in_progress simultaneously"
        );
    }
}

/// A prepared request waiting for START.
#[derive(Debug, Clone)]
pub struct ArmedCapture {
    pub request: CaptureRequest,
    /// Prepare reinitialized the pipeline, so the JPEG default must be
    /// restored after the frames are pulled.
    pub reinitialized: bool,
}

/// CaptureEngine instance
pub struct CaptureEngine {
    slot: Mutex<CaptureSlot>,
    pipeline: Arc<CameraPipeline>,
    store: Arc<ArtifactStore>,
    stream: Arc<StreamSupervisor>,
    drop_frames: u32,
}

impl CaptureEngine {
    pub fn new(
        pipeline: Arc<CameraPipeline>,
        store: Arc<ArtifactStore>,
        stream: Arc<StreamSupervisor>,
        drop_frames: u32,
    ) -> Self {
        Self {
            slot: Mutex::new(CaptureSlot::default()),
            pipeline,
            store,
            stream,
            drop_frames,
        }
    }

    /// Armed and idle: the state advertised as `OK` to a READY probe.
    pub async fn is_armed(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.ready && !slot.in_progress
    }

    /// Slot flags for the status endpoint.
    pub async fn status(&self) -> (bool, bool) {
        let slot = self.slot.lock().await;
        (slot.ready, slot.in_progress)
    }

    /// Prepare for a capture: leaves the pipeline ready to pull frames the
    /// moment START lands.
    pub async fn prepare(&self, request: CaptureRequest) -> Result<()> {
        {
            let slot = self.slot.lock().await;
            if slot.ready || slot.in_progress {
                return Err(Error::Busy);
            }
        }

        self.stream.disable();
        self.stream.await_quiescence(STREAM_DRAIN_TIMEOUT).await;

        // Only a non-JPEG target forces the full reinit; the streaming
        // pipeline is already in JPEG and a size change is safe in place.
        let reinitialized = request.pixel_format != PixelFormat::Jpeg;
        if reinitialized {
            self.pipeline
                .reinitialize(request.pixel_format, request.frame_size)
                .await
                .map_err(|e| Error::CameraInit(e.to_string()))?;
        } else {
            self.pipeline
                .set_size_within_format(request.frame_size)
                .await?;
        }

        self.pipeline.apply_settings(&request.tuning).await?;
        self.pipeline.drop_frames(self.drop_frames).await;
        self.pipeline.mark_prepared().await;

        let mut slot = self.slot.lock().await;
        if slot.in_progress {
            return Err(Error::Busy);
        }
        slot.armed = Some(ArmedCapture {
            request,
            reinitialized,
        });
        slot.ready = true;
        slot.check_invariant();
        tracing::info!("Capture slot armed");
        Ok(())
    }

    /// Flip the slot from armed to firing and hand back the request.
    /// Returns None unless the slot is armed and idle.
    pub async fn claim(&self) -> Option<ArmedCapture> {
        let mut slot = self.slot.lock().await;
        if !slot.ready || slot.in_progress {
            return None;
        }
        let armed = slot.armed.take()?;
        slot.ready = false;
        slot.in_progress = true;
        slot.check_invariant();
        Some(armed)
    }

    /// Execute a claimed capture after `start_delay_us` of local time.
    pub async fn run(&self, armed: ArmedCapture, start_delay_us: i64) {
        let deadline_us = clock::monotonic_us() + start_delay_us;
        tracing::info!(
            session = %armed.request.session,
            frame_count = armed.request.frame_count,
            start_delay_us,
            "Slave capture firing"
        );
        clock::wait_until(deadline_us).await;

        let artifacts = record_frames(
            &self.pipeline,
            &self.store,
            &armed.request.session,
            armed.request.pixel_format,
            armed.request.frame_count,
        )
        .await;

        if armed.reinitialized {
            if let Err(e) = self.pipeline.restore_default().await {
                tracing::warn!(error = %e, "Restore camera init failed");
            }
        }

        let mut slot = self.slot.lock().await;
        slot.in_progress = false;
        slot.check_invariant();
        tracing::info!(
            session = %armed.request.session,
            persisted = artifacts.len(),
            "Slave capture complete"
        );
    }
}

/// Pull and persist `frame_count` frames, timestamping each in local
/// monotonic milliseconds. Individual failures are logged and skipped.
/// Shared by both endpoints' capture executors.
pub async fn record_frames(
    pipeline: &CameraPipeline,
    store: &ArtifactStore,
    session: &str,
    format: PixelFormat,
    frame_count: u32,
) -> Vec<PathBuf> {
    let mut artifacts = Vec::with_capacity(frame_count as usize);
    let mut prev_timestamp_ms: Option<i64> = None;

    for index in 0..frame_count {
        let frame = match pipeline.pull_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(frame = index, error = %e, "Frame capture failed");
                continue;
            }
        };

        let timestamp_ms = clock::monotonic_ms();
        let delta_ms = prev_timestamp_ms.map(|prev| timestamp_ms - prev).unwrap_or(0);
        match store.persist(session, timestamp_ms, format, &frame.data).await {
            Ok(path) => {
                tracing::info!(
                    path = %path.display(),
                    frame = index + 1,
                    total = frame_count,
                    dt_ms = delta_ms,
                    "Frame recorded"
                );
                artifacts.push(path);
            }
            Err(e) => {
                tracing::warn!(frame = index, error = %e, "Frame persist failed");
            }
        }

        pipeline.return_frame(frame).await;
        prev_timestamp_ms = Some(timestamp_ms);
    }

    artifacts
}
