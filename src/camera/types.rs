//! Pixel formats, frame sizes and the sensor tuning vocabulary.

use serde::{Deserialize, Serialize};

/// Pixel format delivered by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Jpeg,
    Rgb565,
    Grayscale,
    Yuv422,
}

impl PixelFormat {
    /// Parse a request value: a known name (case-insensitive) or a numeric
    /// index. Anything else falls back to JPEG.
    pub fn parse(value: &str) -> Self {
        if value.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return match value.parse::<u8>() {
                Ok(1) => PixelFormat::Rgb565,
                Ok(2) => PixelFormat::Grayscale,
                Ok(3) => PixelFormat::Yuv422,
                _ => PixelFormat::Jpeg,
            };
        }
        match value.to_ascii_lowercase().as_str() {
            "jpeg" => PixelFormat::Jpeg,
            "rgb565" => PixelFormat::Rgb565,
            "grayscale" => PixelFormat::Grayscale,
            "yuv422" => PixelFormat::Yuv422,
            _ => PixelFormat::Jpeg,
        }
    }

    /// Artifact file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpg",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Grayscale => "gray",
            PixelFormat::Yuv422 => "yuv",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Rgb565 => "rgb565",
            PixelFormat::Grayscale => "grayscale",
            PixelFormat::Yuv422 => "yuv422",
        }
    }

    /// Bytes per pixel for uncompressed formats; None for JPEG.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb565 => Some(2),
            PixelFormat::Grayscale => Some(1),
            PixelFormat::Yuv422 => Some(2),
        }
    }
}

/// Sensor output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSize {
    Qqvga,
    Qvga,
    Vga,
    Svga,
    Xga,
    Sxga,
    Uxga,
}

impl FrameSize {
    /// Parse a request value: a known name (case-insensitive) or a numeric
    /// index. Anything else falls back to VGA.
    pub fn parse(value: &str) -> Self {
        if value.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return value
                .parse::<usize>()
                .ok()
                .and_then(Self::from_index)
                .unwrap_or(FrameSize::Vga);
        }
        match value.to_ascii_lowercase().as_str() {
            "qqvga" => FrameSize::Qqvga,
            "qvga" => FrameSize::Qvga,
            "vga" => FrameSize::Vga,
            "svga" => FrameSize::Svga,
            "xga" => FrameSize::Xga,
            "sxga" => FrameSize::Sxga,
            "uxga" => FrameSize::Uxga,
            _ => FrameSize::Vga,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        [
            FrameSize::Qqvga,
            FrameSize::Qvga,
            FrameSize::Vga,
            FrameSize::Svga,
            FrameSize::Xga,
            FrameSize::Sxga,
            FrameSize::Uxga,
        ]
        .get(index)
        .copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qvga => (320, 240),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameSize::Qqvga => "qqvga",
            FrameSize::Qvga => "qvga",
            FrameSize::Vga => "vga",
            FrameSize::Svga => "svga",
            FrameSize::Xga => "xga",
            FrameSize::Sxga => "sxga",
            FrameSize::Uxga => "uxga",
        }
    }
}

/// Ordered sensor tuning key/value pairs carried by a capture request.
///
/// Keys the sensor does not know are skipped at apply time; order is
/// preserved because some registers depend on earlier ones (e.g. `agc`
/// before `agc_gain`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorSettings {
    pairs: Vec<(String, i32)>,
}

impl SensorSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: i32) {
        self.pairs.push((key.into(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Build from ordered wire pairs. `framesize` values map through name
    /// parsing; non-numeric values for other keys are dropped.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut settings = Self::new();
        for (key, value) in pairs {
            if key == "framesize" {
                settings.push("framesize", FrameSize::parse(value).index() as i32);
            } else if let Ok(v) = value.parse::<i32>() {
                settings.push(key.clone(), v);
            }
        }
        settings
    }

    /// Build from a flat JSON object of numbers, booleans and strings.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut settings = Self::new();
        let Some(map) = value.as_object() else {
            return settings;
        };
        for (key, item) in map {
            let parsed = match item {
                serde_json::Value::Number(n) => n.as_i64().map(|v| v as i32),
                serde_json::Value::Bool(b) => Some(*b as i32),
                serde_json::Value::String(s) => {
                    if key == "framesize" {
                        Some(FrameSize::parse(s).index() as i32)
                    } else {
                        s.parse().ok()
                    }
                }
                _ => None,
            };
            if let Some(v) = parsed {
                settings.push(key.clone(), v);
            }
        }
        settings
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Clamp a tuning value into the register's legal range. Returns None for
/// keys that are not sensor registers (request parameters, unknown names).
pub fn clamp_setting(key: &str, value: i32) -> Option<i32> {
    fn clamped(value: i32, min: i32, max: i32) -> i32 {
        value.clamp(min, max)
    }
    fn boolean(value: i32) -> i32 {
        (value != 0) as i32
    }

    let clamped = match key {
        "quality" => clamped(value, 2, 63),
        "brightness" | "contrast" | "saturation" | "ae_level" => clamped(value, -2, 2),
        "gainceiling" => clamped(value, 0, 6),
        "wb_mode" => clamped(value, 0, 4),
        "aec_value" => clamped(value, 0, 1200),
        "agc_gain" => clamped(value, 0, 30),
        "special_effect" => clamped(value, 0, 6),
        "colorbar" | "awb" | "awb_gain" | "aec2" | "agc" | "gain_ctrl" | "bpc" | "wpc"
        | "raw_gma" | "lenc" | "hmirror" | "vflip" | "dcw" | "exposure_ctrl" => boolean(value),
        _ => return None,
    };
    Some(clamped)
}
