//! ArtifactStore - frame persistence
//!
//! ## Responsibilities
//!
//! - Ensure the capture directory exists
//! - Persist raw frame buffers as `<session>-<monotonic_ms>.<ext>`
//! - Parse artifact names back into their components
//!
//! Files hold the sensor buffer byte-for-byte: no header, no framing, no
//! index file, no rewrites.

use std::path::{Path, PathBuf};

use crate::camera::PixelFormat;
use crate::error::Result;

/// ArtifactStore instance
pub struct ArtifactStore {
    capture_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store, making the capture directory if needed.
    pub async fn new(capture_dir: impl Into<PathBuf>) -> Result<Self> {
        let capture_dir = capture_dir.into();
        tokio::fs::create_dir_all(&capture_dir).await?;
        Ok(Self { capture_dir })
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    /// Path an artifact with these components will be written to.
    pub fn artifact_path(&self, session: &str, timestamp_ms: i64, format: PixelFormat) -> PathBuf {
        self.capture_dir
            .join(format!("{}-{}.{}", session, timestamp_ms, format.extension()))
    }

    /// Persist one frame. Opened, written, closed; never rewritten.
    pub async fn persist(
        &self,
        session: &str,
        timestamp_ms: i64,
        format: PixelFormat,
        data: &[u8],
    ) -> Result<PathBuf> {
        let path = self.artifact_path(session, timestamp_ms, format);
        tokio::fs::write(&path, data).await?;
        tracing::debug!(
            path = %path.display(),
            size = data.len(),
            "Frame persisted"
        );
        Ok(path)
    }

    /// Parse a file name back into `(session, timestamp_ms, extension)`.
    /// The timestamp separator is the last `-`, so sessions may themselves
    /// contain dashes.
    pub fn parse_artifact_name(name: &str) -> Option<(String, i64, String)> {
        let (stem, ext) = name.rsplit_once('.')?;
        let (session, timestamp) = stem.rsplit_once('-')?;
        let timestamp_ms = timestamp.parse::<i64>().ok()?;
        if session.is_empty() {
            return None;
        }
        Some((session.to_string(), timestamp_ms, ext.to_string()))
    }
}
