//! CaptureOrchestrator - master-side capture sequencer
//!
//! ## Responsibilities
//!
//! - Bounded capture queue; HTTP handlers are thin producers
//! - The single capture task: the only task driving the camera pipeline
//!   while a capture runs
//! - The sequence: quiesce → prepare slave → settle → reinit → tune →
//!   warm up → await ready → probe → fire → spin to deadline → record →
//!   restore
//!
//! Every exit path, success or failure, runs the restore step, so the
//! pipeline always ends in the streaming default.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::camera::CameraPipeline;
use crate::capture_engine::record_frames;
use crate::clock;
use crate::clock_probe::{ClockProbe, SyncMetrics};
use crate::error::{Error, Result};
use crate::models::{CaptureOutcome, CaptureRequest};
use crate::slave_gateway::SlaveGateway;
use crate::state::AppConfig;
use crate::storage::ArtifactStore;
use crate::stream_supervisor::StreamSupervisor;
use crate::sync_client::SlaveControlClient;

/// Queued captures beyond the one running; the next producer gets busy.
const QUEUE_DEPTH: usize = 2;

/// How long the quiesce step waits for the stream loop to drain.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Capture sequence phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    QuiesceStream,
    PrepareSlave,
    WaitSettle,
    ReconfigCamera,
    ApplySensor,
    Warmup,
    AwaitSlaveReady,
    ClockProbe,
    SkipSync,
    Fire,
    SpinToDeadline,
    Record,
    Restore,
}

/// Timing/policy knobs for one sequencer.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Default safety margin S in microseconds.
    pub safety_us: i64,
    pub probe_pings: u32,
    pub probe_timeout: Duration,
    pub drop_frames: u32,
    pub prepare_settle: Duration,
    pub ready_timeout: Duration,
    pub ready_poll: Duration,
    pub start_retries: u32,
    pub start_retry_delay: Duration,
    pub allow_slave_missing: bool,
}

impl CaptureConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            safety_us: config.sync_safety_ms * 1000,
            probe_pings: config.sync_udp_pings,
            probe_timeout: Duration::from_millis(300),
            drop_frames: config.drop_frames,
            prepare_settle: Duration::from_millis(config.slave_prepare_delay_ms),
            ready_timeout: Duration::from_millis(config.slave_ready_timeout_ms),
            ready_poll: Duration::from_millis(config.slave_ready_poll_ms),
            start_retries: config.sync_start_retries,
            start_retry_delay: Duration::from_millis(config.sync_start_retry_delay_ms),
            allow_slave_missing: config.allow_slave_missing,
        }
    }
}

/// The two start delays derived from one probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDelays {
    /// Delivered inside `START`, interpreted in slave-local time.
    pub slave_us: i64,
    /// Waited locally by the master.
    pub master_us: i64,
}

/// Derive both start delays. At the instant the slave receives `START`,
/// `trip` microseconds of transit have already passed, and the master's
/// deadline must also absorb the clock disparity so both sides' waits end
/// at the same physical moment up to probe noise.
pub fn compute_delays(safety_us: i64, metrics: &SyncMetrics) -> StartDelays {
    StartDelays {
        slave_us: safety_us,
        master_us: (safety_us + metrics.one_way_trip_us + metrics.cpu_disparity_us).max(0),
    }
}

/// The capture sequence runner, owned by the single capture task.
pub struct CaptureSequencer {
    pipeline: Arc<CameraPipeline>,
    store: Arc<ArtifactStore>,
    stream: Arc<StreamSupervisor>,
    control: SlaveControlClient,
    probe: ClockProbe,
    gateway: Option<Arc<SlaveGateway>>,
    config: CaptureConfig,
}

impl CaptureSequencer {
    pub fn new(
        pipeline: Arc<CameraPipeline>,
        store: Arc<ArtifactStore>,
        stream: Arc<StreamSupervisor>,
        control: SlaveControlClient,
        probe: ClockProbe,
        gateway: Option<Arc<SlaveGateway>>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            pipeline,
            store,
            stream,
            control,
            probe,
            gateway,
            config,
        }
    }

    fn phase(&self, phase: CapturePhase) {
        tracing::debug!(phase = ?phase, "Capture phase");
    }

    /// Run one full capture. Restore executes on every exit path.
    pub async fn run_sequence(&self, request: &CaptureRequest) -> CaptureOutcome {
        tracing::info!(
            session = %request.session,
            frame_count = request.frame_count,
            format = %request.pixel_format.as_str(),
            size = %request.frame_size.as_str(),
            "Capture sequence starting"
        );
        let result = self.capture(request).await;

        self.phase(CapturePhase::Restore);
        if let Err(e) = self.pipeline.restore_default().await {
            tracing::warn!(error = %e, "Restore camera init failed");
        }

        match result {
            Ok(artifacts) => {
                tracing::info!(
                    session = %request.session,
                    persisted = artifacts.len(),
                    "Capture sequence complete"
                );
                CaptureOutcome::success(artifacts)
            }
            Err(e) => {
                tracing::warn!(session = %request.session, error = %e, "Capture sequence failed");
                CaptureOutcome::failure(e.to_string())
            }
        }
    }

    async fn capture(&self, request: &CaptureRequest) -> Result<Vec<PathBuf>> {
        let cfg = &self.config;

        self.phase(CapturePhase::QuiesceStream);
        self.stream.disable();
        self.stream.await_quiescence(STREAM_DRAIN_TIMEOUT).await;

        self.phase(CapturePhase::PrepareSlave);
        if let Some(gateway) = &self.gateway {
            if let Err(e) = gateway.prepare(&request.to_params()).await {
                tracing::warn!(error = %e, "Slave prepare failed");
            }
        }

        self.phase(CapturePhase::WaitSettle);
        tokio::time::sleep(cfg.prepare_settle).await;

        self.phase(CapturePhase::ReconfigCamera);
        self.pipeline
            .reinitialize(request.pixel_format, request.frame_size)
            .await
            .map_err(|_| Error::Capture("camera init failed".into()))?;

        self.phase(CapturePhase::ApplySensor);
        self.pipeline.apply_settings(&request.tuning).await?;

        self.phase(CapturePhase::Warmup);
        self.pipeline.drop_frames(cfg.drop_frames).await;

        self.phase(CapturePhase::AwaitSlaveReady);
        let mut slave_present = true;
        if let Err(e) = self
            .control
            .await_ready(cfg.ready_timeout, cfg.ready_poll)
            .await
        {
            tracing::warn!(error = %e, "Slave ready check failed");
            if !cfg.allow_slave_missing {
                return Err(Error::Capture("slave not ready".into()));
            }
            slave_present = false;
        }

        let mut metrics = SyncMetrics::zero();
        if slave_present {
            self.phase(CapturePhase::ClockProbe);
            match self.probe.probe().await {
                Ok(measured) => metrics = measured,
                Err(e) => {
                    tracing::warn!(error = %e, "UDP sync failed");
                    if !cfg.allow_slave_missing {
                        return Err(Error::Capture("udp sync failed".into()));
                    }
                    slave_present = false;
                }
            }
        }
        if !slave_present {
            self.phase(CapturePhase::SkipSync);
        }

        let safety_us = request.start_overhead_us.unwrap_or(cfg.safety_us);
        let delays = compute_delays(safety_us, &metrics);
        if slave_present {
            self.phase(CapturePhase::Fire);
            tracing::info!(
                trip_us = metrics.one_way_trip_us,
                disparity_us = metrics.cpu_disparity_us,
                slave_delay_us = delays.slave_us,
                master_delay_us = delays.master_us,
                "Firing START"
            );
            if let Err(e) = self
                .control
                .fire(delays.slave_us, cfg.start_retries, cfg.start_retry_delay)
                .await
            {
                tracing::warn!(error = %e, "Slave start notify failed");
                if !cfg.allow_slave_missing {
                    return Err(Error::Capture("slave start failed".into()));
                }
            }
        }

        // The deadline is taken after the ACK so it shares the clock state
        // the metrics were computed against.
        self.phase(CapturePhase::SpinToDeadline);
        let deadline_us = clock::monotonic_us() + delays.master_us;
        clock::wait_until(deadline_us).await;

        self.phase(CapturePhase::Record);
        let artifacts = record_frames(
            &self.pipeline,
            &self.store,
            &request.session,
            request.pixel_format,
            request.frame_count,
        )
        .await;
        if artifacts.is_empty() {
            return Err(Error::Capture("capture timeout".into()));
        }
        Ok(artifacts)
    }
}

struct QueuedCapture {
    request: CaptureRequest,
    done: oneshot::Sender<CaptureOutcome>,
}

/// CaptureOrchestrator instance: the queue handle given to HTTP handlers.
pub struct CaptureOrchestrator {
    tx: mpsc::Sender<QueuedCapture>,
}

impl CaptureOrchestrator {
    /// Spawn the capture task and return the producer handle.
    pub fn start(sequencer: CaptureSequencer) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<QueuedCapture>(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let outcome = sequencer.run_sequence(&job.request).await;
                if job.done.send(outcome).is_err() {
                    tracing::debug!("Capture requester went away before completion");
                }
            }
        });
        Arc::new(Self { tx })
    }

    /// Enqueue a request. Fails fast with busy when the queue is full; the
    /// receiver resolves when the sequence finishes.
    pub fn enqueue(&self, request: CaptureRequest) -> Result<oneshot::Receiver<CaptureOutcome>> {
        let (done, outcome) = oneshot::channel();
        self.tx
            .try_send(QueuedCapture { request, done })
            .map_err(|_| Error::Busy)?;
        Ok(outcome)
    }
}
