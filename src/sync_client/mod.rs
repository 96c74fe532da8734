//! SlaveControlClient - READY/START control exchanges
//!
//! ## Responsibilities
//!
//! - `READY` polling until the slave advertises armed-and-idle
//! - `START <delay_us>` dispatch with bounded retry
//!
//! All bodies are ASCII over single datagrams; replies are prefix-matched.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Per-exchange reply timeout, matching the probe's short deadline.
const EXCHANGE_TIMEOUT: Duration = Duration::from_millis(300);

/// SlaveControlClient instance
pub struct SlaveControlClient {
    target: String,
}

impl SlaveControlClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            target: format!("{host}:{port}"),
        }
    }

    /// One request/reply round trip on a fresh socket.
    async fn exchange(&self, payload: &str) -> Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Unreachable(format!("control socket: {e}")))?;
        socket
            .connect(&self.target)
            .await
            .map_err(|e| Error::Unreachable(format!("control resolve {}: {e}", self.target)))?;
        socket.send(payload.as_bytes()).await?;

        let mut buf = [0u8; 64];
        let received = timeout(EXCHANGE_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::Timeout(format!("no reply to {payload}")))??;
        Ok(String::from_utf8_lossy(&buf[..received]).into_owned())
    }

    /// Single armed-and-idle check.
    pub async fn ready_check(&self) -> Result<()> {
        let reply = self.exchange("READY").await?;
        if reply.starts_with("OK") {
            Ok(())
        } else {
            Err(Error::NotArmed)
        }
    }

    /// Poll `READY` until the slave answers `OK` or the total timeout
    /// elapses.
    pub async fn await_ready(&self, total_timeout: Duration, poll_interval: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + total_timeout;
        loop {
            match self.ready_check().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(error = %e, "Slave not ready yet");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout("slave ready wait expired".into()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Single `START <delay_us>` dispatch expecting `ACK`.
    async fn start_capture(&self, start_delay_us: i64) -> Result<()> {
        let reply = self.exchange(&format!("START {start_delay_us}")).await?;
        if reply.starts_with("ACK") {
            Ok(())
        } else {
            Err(Error::NotArmed)
        }
    }

    /// `START` with bounded retry. Any non-`ACK` reply or timeout counts as
    /// a failed attempt.
    pub async fn fire(
        &self,
        start_delay_us: i64,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<()> {
        let mut last_err = Error::Timeout("no START attempts made".into());
        for attempt in 0..retries {
            match self.start_capture(start_delay_us).await {
                Ok(()) => {
                    tracing::info!(
                        start_delay_us,
                        attempt = attempt + 1,
                        "Slave acknowledged START"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        retries,
                        error = %e,
                        "START attempt failed"
                    );
                    last_err = e;
                }
            }
            tokio::time::sleep(retry_delay).await;
        }
        Err(last_err)
    }
}
