//! Sensor driver seam.
//!
//! The capture core talks to the imaging hardware through [`SensorDriver`]
//! only. [`SyntheticSensor`] is the built-in implementation: a deterministic
//! frame generator with the same lifecycle (init/deinit/power-cycle) and
//! framing (JPEG markers, raw byte counts) as a real sensor, so both roles
//! run end-to-end without hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::camera::types::{FrameSize, PixelFormat};
use crate::error::{Error, Result};

/// One frame pulled from the sensor.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub data: Bytes,
    pub format: PixelFormat,
    pub size: FrameSize,
}

/// Low-level sensor operations.
///
/// `init` configures both the sensor and its DMA consumer for the given
/// format; `set_frame_size` reconfigures resolution in place and is only
/// valid within the current format. There is deliberately no in-place
/// format setter: the DMA path is laid out at init time and a bare format
/// register write desynchronizes it.
#[async_trait]
pub trait SensorDriver: Send + Sync {
    /// Bring the sensor up in the given format and size.
    async fn init(&self, format: PixelFormat, size: FrameSize) -> Result<()>;

    /// Tear the sensor down. Idempotent.
    async fn deinit(&self);

    /// Toggle the sensor's power-down line with settle delays either side.
    async fn power_cycle(&self);

    /// In-place resolution change within the current format.
    async fn set_frame_size(&self, size: FrameSize) -> Result<()>;

    /// Write a tuning register. Unknown keys are ignored by the hardware.
    async fn write_register(&self, key: &str, value: i32);

    /// Pull the next frame.
    async fn fetch_frame(&self) -> Result<FrameBuffer>;

    /// Hand a frame buffer back to the driver's pool.
    async fn recycle(&self, frame: FrameBuffer) {
        drop(frame);
    }
}

#[derive(Debug, Clone, Copy)]
struct SensorMode {
    format: PixelFormat,
    size: FrameSize,
}

/// Deterministic stand-in sensor.
pub struct SyntheticSensor {
    mode: Mutex<Option<SensorMode>>,
    frame_counter: AtomicU64,
    /// Simulated sensor frame time.
    frame_interval: Duration,
    /// Settle delay on each edge of the power-down toggle.
    reset_delay: Duration,
}

impl SyntheticSensor {
    pub fn new() -> Self {
        Self::with_timing(Duration::from_millis(30), Duration::from_millis(20))
    }

    /// Construct with explicit frame time and power-cycle settle delay.
    pub fn with_timing(frame_interval: Duration, reset_delay: Duration) -> Self {
        Self {
            mode: Mutex::new(None),
            frame_counter: AtomicU64::new(0),
            frame_interval,
            reset_delay,
        }
    }

    fn render(&self, mode: SensorMode, sequence: u64) -> Bytes {
        let (width, height) = mode.size.dimensions();
        match mode.format.bytes_per_pixel() {
            Some(bpp) => {
                let len = width as usize * height as usize * bpp;
                let fill = (sequence & 0xff) as u8;
                Bytes::from(vec![fill; len])
            }
            None => {
                // JPEG: SOI, a sequence-dependent payload, EOI. Payload size
                // scales with resolution the way a real encoder's would.
                let payload_len = (width as usize * height as usize) / 20;
                let mut data = Vec::with_capacity(payload_len + 4);
                data.extend_from_slice(&[0xff, 0xd8]);
                data.extend((0..payload_len).map(|i| (i as u64 ^ sequence) as u8));
                data.extend_from_slice(&[0xff, 0xd9]);
                Bytes::from(data)
            }
        }
    }
}

impl Default for SyntheticSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorDriver for SyntheticSensor {
    async fn init(&self, format: PixelFormat, size: FrameSize) -> Result<()> {
        let mut mode = self.mode.lock().await;
        if mode.is_some() {
            return Err(Error::CameraInit("sensor already initialized".into()));
        }
        *mode = Some(SensorMode { format, size });
        tracing::debug!(
            format = %format.as_str(),
            size = %size.as_str(),
            "Synthetic sensor initialized"
        );
        Ok(())
    }

    async fn deinit(&self) {
        let mut mode = self.mode.lock().await;
        *mode = None;
    }

    async fn power_cycle(&self) {
        tokio::time::sleep(self.reset_delay).await;
        tokio::time::sleep(self.reset_delay).await;
    }

    async fn set_frame_size(&self, size: FrameSize) -> Result<()> {
        let mut mode = self.mode.lock().await;
        match mode.as_mut() {
            Some(m) => {
                m.size = size;
                Ok(())
            }
            None => Err(Error::Internal("sensor not initialized".into())),
        }
    }

    async fn write_register(&self, key: &str, value: i32) {
        tracing::trace!(key = %key, value = value, "Sensor register write");
    }

    async fn fetch_frame(&self) -> Result<FrameBuffer> {
        let mode = {
            let mode = self.mode.lock().await;
            mode.ok_or_else(|| Error::Internal("sensor not initialized".into()))?
        };
        if !self.frame_interval.is_zero() {
            tokio::time::sleep(self.frame_interval).await;
        }
        let sequence = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        Ok(FrameBuffer {
            data: self.render(mode, sequence),
            format: mode.format,
            size: mode.size,
        })
    }
}
