//! SlaveSyncServer - UDP control endpoint on the slave
//!
//! ## Responsibilities
//!
//! - Answer `READY` probes from the armed-and-idle slot state
//! - Echo clock-probe timestamps with local monotonic microseconds
//! - Accept `START <delay_us>` and launch the prepared capture
//!
//! The `ACK` is sent before the capture task is spawned, so the master's
//! measured round trip never includes capture setup cost.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::capture_engine::{ArmedCapture, CaptureEngine};
use crate::clock;
use crate::clock_probe::parse_decimal_i64;
use crate::error::{Error, Result};

/// SlaveSyncServer instance
pub struct SlaveSyncServer {
    socket: UdpSocket,
    engine: Arc<CaptureEngine>,
}

/// A claimed capture waiting for its launch, produced while the reply is
/// still unsent.
struct Launch {
    armed: ArmedCapture,
    delay_us: i64,
}

impl SlaveSyncServer {
    /// Bind the sync port. Port 0 picks an ephemeral port (tests).
    pub async fn bind(host: &str, port: u16, engine: Arc<CaptureEngine>) -> Result<Self> {
        let socket = UdpSocket::bind((host, port))
            .await
            .map_err(|e| Error::Unreachable(format!("sync bind {host}:{port}: {e}")))?;
        tracing::info!(addr = %socket.local_addr()?, "UDP sync server bound");
        Ok(Self { socket, engine })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Single cooperative receiver loop.
    pub async fn run(self) {
        let mut buf = [0u8; 64];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!(error = %e, "UDP recv failed");
                    continue;
                }
            };

            let (reply, launch) = self.dispatch(&buf[..len]).await;
            if let Err(e) = self.socket.send_to(reply.as_bytes(), peer).await {
                tracing::warn!(peer = %peer, error = %e, "UDP reply failed");
            }

            // Launch strictly after the reply left the socket.
            if let Some(Launch { armed, delay_us }) = launch {
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    engine.run(armed, delay_us).await;
                });
            }
        }
    }

    async fn dispatch(&self, payload: &[u8]) -> (String, Option<Launch>) {
        let text = String::from_utf8_lossy(payload).into_owned();

        if text.starts_with("READY") {
            let reply = if self.engine.is_armed().await { "OK" } else { "NO" };
            return (reply.to_string(), None);
        }

        if let Some(rest) = text.strip_prefix("START") {
            return match rest.trim().parse::<i64>() {
                Ok(delay_us) if delay_us >= 0 => match self.engine.claim().await {
                    Some(armed) => {
                        tracing::info!(delay_us, "START accepted");
                        ("ACK".to_string(), Some(Launch { armed, delay_us }))
                    }
                    None => ("NO".to_string(), None),
                },
                _ => ("NO".to_string(), None),
            };
        }

        if parse_decimal_i64(payload).is_some() {
            return (clock::monotonic_us().to_string(), None);
        }

        ("ERR".to_string(), None)
    }
}
