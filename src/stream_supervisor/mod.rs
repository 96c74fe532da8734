//! StreamSupervisor - streaming activity control
//!
//! ## Responsibilities
//!
//! - Enable/disable flags for the MJPEG loop
//! - Stop-pending signalling for immediate exit at a frame boundary
//! - Quiescence wait used by the capture path before it takes the camera
//!
//! Three single-writer flags; readers tolerate values that are at most one
//! frame stale, so plain Release/Acquire atomics are enough.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll step while waiting for the in-flight stream iteration to drain.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// StreamSupervisor instance
pub struct StreamSupervisor {
    enabled: AtomicBool,
    stop_requested: AtomicBool,
    in_progress: AtomicBool,
}

impl StreamSupervisor {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Allow the streaming loop to run.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop streaming: clears the enable flag and raises stop-pending so an
    /// in-flight loop exits at the next frame boundary.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Whether the loop may produce another frame.
    pub fn should_continue(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && !self.stop_requested.load(Ordering::Acquire)
    }

    /// Claim the single streaming slot. Returns None when another client
    /// already holds it; the guard releases the slot on drop.
    pub fn begin(self: Arc<Self>) -> Option<StreamGuard> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(StreamGuard { supervisor: self })
    }

    /// Wait until no stream iteration is in flight, up to `timeout`. The
    /// caller proceeds either way; the camera is about to be reinitialized.
    pub async fn await_quiescence(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_active() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("Stream did not drain before timeout");
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        true
    }
}

impl Default for StreamSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on the streaming slot for the lifetime of one client.
pub struct StreamGuard {
    supervisor: Arc<StreamSupervisor>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.supervisor.in_progress.store(false, Ordering::Release);
        self.supervisor.stop_requested.store(false, Ordering::Release);
    }
}
