//! Camera pipeline and sensor abstraction.
//!
//! ## Responsibilities
//!
//! - Pixel format / frame size vocabulary and parsing
//! - Sensor driver seam (`SensorDriver`) + built-in synthetic sensor
//! - `CameraPipeline`: lifecycle state machine over the driver

mod driver;
mod pipeline;
mod types;

pub use driver::{FrameBuffer, SensorDriver, SyntheticSensor};
pub use pipeline::{CameraPipeline, CameraState, STREAMING_FORMAT};
pub use types::{clamp_setting, FrameSize, PixelFormat, SensorSettings};
