//! Local monotonic clock
//!
//! Microsecond counter anchored at process start. The master and slave
//! counters are unrelated; the disparity between them is what the clock
//! probe measures.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Pin the epoch; call once at startup before handing out timestamps.
pub fn init() {
    let _ = epoch();
}

/// Local monotonic time in microseconds.
pub fn monotonic_us() -> i64 {
    epoch().elapsed().as_micros() as i64
}

/// Local monotonic time in milliseconds.
pub fn monotonic_ms() -> i64 {
    monotonic_us() / 1000
}

/// Remaining budget below which the wait switches from cooperative sleeps
/// to busy spinning. Scheduler tick jitter is on the order of 1 ms, so the
/// final 2 ms must not be slept away.
const SPIN_THRESHOLD_US: i64 = 2000;

/// Busy-wait granularity inside the final window.
const SPIN_STEP_US: i64 = 100;

/// Wait until `deadline_us` (local monotonic). Coarse cooperative sleeps at
/// millisecond granularity while more than 2 ms remain, then sub-100 µs
/// busy spins to the deadline.
pub async fn wait_until(deadline_us: i64) {
    loop {
        let remaining_us = deadline_us - monotonic_us();
        if remaining_us <= 0 {
            return;
        }
        if remaining_us > SPIN_THRESHOLD_US {
            tokio::time::sleep(Duration::from_millis((remaining_us / 1000) as u64)).await;
        } else {
            let spin_until = monotonic_us() + SPIN_STEP_US;
            while monotonic_us() < spin_until && monotonic_us() < deadline_us {
                std::hint::spin_loop();
            }
        }
    }
}
