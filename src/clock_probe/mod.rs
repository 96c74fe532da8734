//! ClockProbe - link trip time and clock disparity measurement
//!
//! ## Responsibilities
//!
//! - K-ping UDP echo exchange against the slave sync port
//! - One-way trip estimate (RTT/2) and master↔slave monotonic disparity
//!
//! Each datagram carries the master's monotonic microseconds as decimal
//! ASCII; the reply is the slave's. The slave timestamp is assumed to be
//! taken near the midpoint of the round trip, so
//! `disparity = (send + rtt/2) - slave_ts`. Metrics are means over the
//! successful samples; zero samples is a probe failure, never zeros.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::clock;
use crate::error::{Error, Result};

/// Measured link characteristics. Both fields are zero only when no probe
/// succeeded and the slave-missing policy zeroed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncMetrics {
    pub one_way_trip_us: i64,
    pub cpu_disparity_us: i64,
}

/// One successful echo exchange.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    pub rtt_us: i64,
    pub disparity_us: i64,
}

impl ProbeSample {
    /// Derive a sample from the three observed timestamps.
    pub fn from_timestamps(send_us: i64, recv_us: i64, slave_us: i64) -> Self {
        let rtt_us = recv_us - send_us;
        let master_at_slave = send_us + rtt_us / 2;
        Self {
            rtt_us,
            disparity_us: master_at_slave - slave_us,
        }
    }
}

impl SyncMetrics {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Arithmetic means over the successful samples; None when empty.
    pub fn from_samples(samples: &[ProbeSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let count = samples.len() as i64;
        let rtt_sum: i64 = samples.iter().map(|s| s.rtt_us).sum();
        let disparity_sum: i64 = samples.iter().map(|s| s.disparity_us).sum();
        Some(Self {
            one_way_trip_us: rtt_sum / count / 2,
            cpu_disparity_us: disparity_sum / count,
        })
    }
}

/// Parse a datagram payload as a decimal signed integer. Leading digits
/// only; anything else is malformed and the sample is discarded.
pub fn parse_decimal_i64(payload: &[u8]) -> Option<i64> {
    let text = std::str::from_utf8(payload).ok()?;
    let trimmed = text.trim_end_matches(['\r', '\n', '\0']);
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<i64>().ok()
}

/// ClockProbe instance
pub struct ClockProbe {
    target: String,
    pings: u32,
    attempt_timeout: Duration,
}

impl ClockProbe {
    pub fn new(host: &str, port: u16, pings: u32, attempt_timeout: Duration) -> Self {
        Self {
            target: format!("{host}:{port}"),
            pings,
            attempt_timeout,
        }
    }

    /// Run one probe session: a fresh socket, K pings, averaged metrics.
    /// Malformed replies never become samples; a session where every reply
    /// was malformed fails as malformed rather than as a timeout.
    pub async fn probe(&self) -> Result<SyncMetrics> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Unreachable(format!("probe socket: {e}")))?;
        socket
            .connect(&self.target)
            .await
            .map_err(|e| Error::Unreachable(format!("probe resolve {}: {e}", self.target)))?;

        let mut samples = Vec::with_capacity(self.pings as usize);
        let mut malformed: u32 = 0;
        let mut buf = [0u8; 64];

        for attempt in 0..self.pings {
            let send_us = clock::monotonic_us();
            let payload = send_us.to_string();
            if let Err(e) = socket.send(payload.as_bytes()).await {
                tracing::debug!(attempt, error = %e, "Probe send failed");
                continue;
            }

            let received = match timeout(self.attempt_timeout, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    tracing::debug!(attempt, error = %e, "Probe recv failed");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(attempt, "Probe reply timed out");
                    continue;
                }
            };
            let recv_us = clock::monotonic_us();

            let Some(slave_us) = parse_decimal_i64(&buf[..received]) else {
                malformed += 1;
                tracing::debug!(attempt, "Discarding malformed probe reply");
                continue;
            };

            samples.push(ProbeSample::from_timestamps(send_us, recv_us, slave_us));
        }

        let metrics = match SyncMetrics::from_samples(&samples) {
            Some(metrics) => metrics,
            None if malformed > 0 => {
                return Err(Error::Malformed(format!(
                    "{malformed} malformed probe replies"
                )));
            }
            None => return Err(Error::Timeout("no probe replies".into())),
        };
        tracing::info!(
            trip_us = metrics.one_way_trip_us,
            disparity_us = metrics.cpu_disparity_us,
            samples = samples.len(),
            pings = self.pings,
            "Clock probe complete"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_math_uses_rtt_midpoint() {
        let sample = ProbeSample::from_timestamps(1_000, 5_000, 13_000);
        assert_eq!(sample.rtt_us, 4_000);
        // master mid = 3000, slave said 13000 -> master behind by 10000
        assert_eq!(sample.disparity_us, -10_000);
    }

    #[test]
    fn metrics_average_the_happy_path_numbers() {
        // Slave replies run 10 ms ahead of the master's send stamp.
        let rtts = [4_000i64, 4_200, 3_800, 4_000];
        let samples: Vec<ProbeSample> = rtts
            .iter()
            .map(|rtt| ProbeSample::from_timestamps(0, *rtt, 10_000))
            .collect();
        let metrics = SyncMetrics::from_samples(&samples).unwrap();
        assert_eq!(metrics.one_way_trip_us, 2_000);
        assert_eq!(metrics.cpu_disparity_us, -8_000);
    }

    #[test]
    fn no_samples_yields_none() {
        assert!(SyncMetrics::from_samples(&[]).is_none());
    }

    #[test]
    fn payload_parsing() {
        assert_eq!(parse_decimal_i64(b"123456"), Some(123456));
        assert_eq!(parse_decimal_i64(b"-42\n"), Some(-42));
        assert_eq!(parse_decimal_i64(b"OK"), None);
        assert_eq!(parse_decimal_i64(b""), None);
        assert_eq!(parse_decimal_i64(&[0xff, 0xfe]), None);
    }
}
