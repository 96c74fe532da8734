//! CameraPipeline - sensor/DMA lifecycle owner.
//!
//! ## Responsibilities
//!
//! - Format-aware (re)initialization with sensor power-cycle
//! - Warm-up frame drops after any reconfiguration
//! - Single-frame pull / return
//!
//! The pipeline owns one invariant above all: a pixel-format change always
//! goes through full deinit + power-cycle + init. The sensor's format
//! register looks writable in place, but the DMA consumer is laid out at
//! init time and stops matching the data framing (JPEG frames lose their
//! start-of-image markers). There is no API here that crosses formats any
//! other way.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::camera::driver::{FrameBuffer, SensorDriver};
use crate::camera::types::{clamp_setting, FrameSize, PixelFormat, SensorSettings};
use crate::error::{Error, Result};

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// Sensor torn down; the only state a format change may pass through.
    Uninitialized,
    /// Live in the streaming default (JPEG).
    Streaming,
    /// Configured for a pending capture.
    Prepared { format: PixelFormat, size: FrameSize },
    /// Initialized, neither streaming nor armed.
    Idle { format: PixelFormat, size: FrameSize },
}

impl CameraState {
    pub fn format(&self, streaming_default: PixelFormat) -> Option<PixelFormat> {
        match self {
            CameraState::Uninitialized => None,
            CameraState::Streaming => Some(streaming_default),
            CameraState::Prepared { format, .. } | CameraState::Idle { format, .. } => {
                Some(*format)
            }
        }
    }
}

/// CameraPipeline instance. Exclusive use during a capture is enforced by
/// the orchestrator / capture slot, not by this type.
pub struct CameraPipeline {
    driver: Arc<dyn SensorDriver>,
    state: Mutex<CameraState>,
    /// Streaming default resolution, restored after every capture.
    default_size: FrameSize,
    /// Settle delay between power-cycle and re-init.
    reinit_settle: Duration,
}

/// Streaming default format. Size is per-deployment (`default_size`).
pub const STREAMING_FORMAT: PixelFormat = PixelFormat::Jpeg;

impl CameraPipeline {
    pub fn new(driver: Arc<dyn SensorDriver>, default_size: FrameSize) -> Self {
        Self::with_settle(driver, default_size, Duration::from_millis(200))
    }

    pub fn with_settle(
        driver: Arc<dyn SensorDriver>,
        default_size: FrameSize,
        reinit_settle: Duration,
    ) -> Self {
        Self {
            driver,
            state: Mutex::new(CameraState::Uninitialized),
            default_size,
            reinit_settle,
        }
    }

    pub fn default_size(&self) -> FrameSize {
        self.default_size
    }

    pub async fn state(&self) -> CameraState {
        *self.state.lock().await
    }

    /// First-time bring-up. Fails if the pipeline is already live.
    pub async fn initialize(&self, format: PixelFormat, size: FrameSize) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != CameraState::Uninitialized {
            return Err(Error::CameraInit("pipeline already initialized".into()));
        }
        self.driver.init(format, size).await?;
        *state = Self::settled_state(format, size, self.default_size);
        tracing::info!(
            format = %format.as_str(),
            size = %size.as_str(),
            "Camera pipeline initialized"
        );
        Ok(())
    }

    /// Full reconfiguration: deinit, power-cycle, settle, init. The only
    /// path that may change pixel format.
    pub async fn reinitialize(&self, format: PixelFormat, size: FrameSize) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != CameraState::Uninitialized {
            self.driver.deinit().await;
        }
        *state = CameraState::Uninitialized;
        self.driver.power_cycle().await;
        if !self.reinit_settle.is_zero() {
            tokio::time::sleep(self.reinit_settle).await;
        }
        self.driver.init(format, size).await.map_err(|e| {
            tracing::warn!(error = %e, "Camera re-init failed");
            e
        })?;
        *state = Self::settled_state(format, size, self.default_size);
        tracing::info!(
            format = %format.as_str(),
            size = %size.as_str(),
            "Camera pipeline reinitialized"
        );
        Ok(())
    }

    /// Reinitialize back to the streaming default.
    pub async fn restore_default(&self) -> Result<()> {
        self.reinitialize(STREAMING_FORMAT, self.default_size).await
    }

    /// In-place resolution change. Format is untouched by construction.
    pub async fn set_size_within_format(&self, size: FrameSize) -> Result<()> {
        let mut state = self.state.lock().await;
        let format = state
            .format(STREAMING_FORMAT)
            .ok_or_else(|| Error::Internal("size change on uninitialized pipeline".into()))?;
        self.driver.set_frame_size(size).await?;
        *state = Self::settled_state(format, size, self.default_size);
        Ok(())
    }

    /// Apply sensor tuning. `framesize` routes through the in-place size
    /// setter; `pixel_format` is refused here (format changes only via
    /// `reinitialize`); non-register keys are skipped.
    pub async fn apply_settings(&self, settings: &SensorSettings) -> Result<()> {
        for (key, value) in settings.iter() {
            match key {
                "framesize" => {
                    if let Some(size) = FrameSize::from_index(value.max(0) as usize) {
                        self.set_size_within_format(size).await?;
                    }
                }
                "pixel_format" => {
                    tracing::warn!(
                        value = value,
                        "Ignoring pixel_format tuning key; format changes require reinit"
                    );
                }
                _ => match clamp_setting(key, value) {
                    Some(clamped) => self.driver.write_register(key, clamped).await,
                    None => {
                        tracing::debug!(key = %key, "Skipping unknown sensor key");
                    }
                },
            }
        }
        Ok(())
    }

    /// Pull and discard `count` frames to purge stale DMA contents after a
    /// reconfiguration. Individual failures are ignored.
    pub async fn drop_frames(&self, count: u32) {
        for _ in 0..count {
            if let Ok(frame) = self.driver.fetch_frame().await {
                self.driver.recycle(frame).await;
            }
        }
    }

    pub async fn pull_frame(&self) -> Result<FrameBuffer> {
        self.driver.fetch_frame().await
    }

    pub async fn return_frame(&self, frame: FrameBuffer) {
        self.driver.recycle(frame).await;
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if *state != CameraState::Uninitialized {
            self.driver.deinit().await;
            *state = CameraState::Uninitialized;
        }
    }

    fn settled_state(format: PixelFormat, size: FrameSize, default_size: FrameSize) -> CameraState {
        if format == STREAMING_FORMAT && size == default_size {
            CameraState::Streaming
        } else {
            CameraState::Idle { format, size }
        }
    }

    /// Mark the current configuration as armed for capture.
    pub async fn mark_prepared(&self) {
        let mut state = self.state.lock().await;
        if let Some(format) = state.format(STREAMING_FORMAT) {
            let size = match *state {
                CameraState::Prepared { size, .. } | CameraState::Idle { size, .. } => size,
                _ => self.default_size,
            };
            *state = CameraState::Prepared { format, size };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Driver that records every lifecycle call.
    struct RecordingDriver {
        log: StdMutex<Vec<String>>,
    }

    impl RecordingDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                log: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl SensorDriver for RecordingDriver {
        async fn init(&self, format: PixelFormat, size: FrameSize) -> Result<()> {
            self.record(format!("init:{}:{}", format.as_str(), size.as_str()));
            Ok(())
        }

        async fn deinit(&self) {
            self.record("deinit".into());
        }

        async fn power_cycle(&self) {
            self.record("power_cycle".into());
        }

        async fn set_frame_size(&self, size: FrameSize) -> Result<()> {
            self.record(format!("set_frame_size:{}", size.as_str()));
            Ok(())
        }

        async fn write_register(&self, key: &str, value: i32) {
            self.record(format!("write:{key}={value}"));
        }

        async fn fetch_frame(&self) -> Result<FrameBuffer> {
            self.record("fetch".into());
            Ok(FrameBuffer {
                data: bytes::Bytes::from_static(&[0u8; 4]),
                format: PixelFormat::Jpeg,
                size: FrameSize::Vga,
            })
        }
    }

    fn pipeline(driver: Arc<RecordingDriver>) -> CameraPipeline {
        CameraPipeline::with_settle(driver, FrameSize::Vga, Duration::ZERO)
    }

    #[tokio::test]
    async fn format_switch_passes_through_uninitialized() {
        let driver = RecordingDriver::new();
        let pipeline = pipeline(driver.clone());
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .await
            .unwrap();
        pipeline
            .reinitialize(PixelFormat::Rgb565, FrameSize::Qvga)
            .await
            .unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                "init:jpeg:vga",
                "deinit",
                "power_cycle",
                "init:rgb565:qvga",
            ]
        );
        assert_eq!(
            pipeline.state().await,
            CameraState::Idle {
                format: PixelFormat::Rgb565,
                size: FrameSize::Qvga
            }
        );
    }

    #[tokio::test]
    async fn random_reconfig_sequences_never_cross_formats_directly() {
        let driver = RecordingDriver::new();
        let pipeline = pipeline(driver.clone());
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .await
            .unwrap();

        let steps = [
            (PixelFormat::Jpeg, FrameSize::Svga),
            (PixelFormat::Rgb565, FrameSize::Qvga),
            (PixelFormat::Rgb565, FrameSize::Qqvga),
            (PixelFormat::Yuv422, FrameSize::Qvga),
            (PixelFormat::Jpeg, FrameSize::Vga),
            (PixelFormat::Grayscale, FrameSize::Vga),
        ];
        let mut current = PixelFormat::Jpeg;
        for (format, size) in steps {
            if format == current {
                pipeline.set_size_within_format(size).await.unwrap();
            } else {
                pipeline.reinitialize(format, size).await.unwrap();
                current = format;
            }
        }

        // Every init must be preceded by a deinit in the call log; no two
        // inits with different formats may be adjacent.
        let calls = driver.calls();
        let mut last_init_format: Option<String> = None;
        let mut torn_down = false;
        for call in &calls {
            if call == "deinit" {
                torn_down = true;
            } else if let Some(rest) = call.strip_prefix("init:") {
                let format = rest.split(':').next().unwrap().to_string();
                if let Some(prev) = &last_init_format {
                    if *prev != format {
                        assert!(torn_down, "cross-format edge without deinit: {calls:?}");
                    }
                }
                last_init_format = Some(format);
                torn_down = false;
            }
        }
    }

    #[tokio::test]
    async fn size_change_within_format_stays_in_place() {
        let driver = RecordingDriver::new();
        let pipeline = pipeline(driver.clone());
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .await
            .unwrap();
        pipeline.set_size_within_format(FrameSize::Svga).await.unwrap();
        assert_eq!(
            driver.calls(),
            vec!["init:jpeg:vga", "set_frame_size:svga"]
        );
    }

    #[tokio::test]
    async fn pixel_format_tuning_key_is_refused() {
        let driver = RecordingDriver::new();
        let pipeline = pipeline(driver.clone());
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .await
            .unwrap();

        let mut settings = SensorSettings::new();
        settings.push("pixel_format", 1);
        settings.push("quality", 80);
        pipeline.apply_settings(&settings).await.unwrap();

        // quality clamped to 63, pixel_format never reaches the driver
        assert_eq!(driver.calls(), vec!["init:jpeg:vga", "write:quality=63"]);
    }

    #[tokio::test]
    async fn shutdown_tears_the_sensor_down_once() {
        let driver = RecordingDriver::new();
        let pipeline = pipeline(driver.clone());
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .await
            .unwrap();
        pipeline.shutdown().await;
        pipeline.shutdown().await;
        assert_eq!(pipeline.state().await, CameraState::Uninitialized);
        assert_eq!(driver.calls(), vec!["init:jpeg:vga", "deinit"]);
    }

    #[tokio::test]
    async fn restore_default_returns_to_streaming_state() {
        let driver = RecordingDriver::new();
        let pipeline = pipeline(driver.clone());
        pipeline
            .initialize(PixelFormat::Jpeg, FrameSize::Vga)
            .await
            .unwrap();
        pipeline
            .reinitialize(PixelFormat::Rgb565, FrameSize::Qvga)
            .await
            .unwrap();
        pipeline.restore_default().await.unwrap();
        assert_eq!(pipeline.state().await, CameraState::Streaming);
    }
}
