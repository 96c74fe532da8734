//! SlaveGateway - slave endpoint HTTP adapter (master side)
//!
//! ## Responsibilities
//!
//! - Capture-prepare POST carrying the request parameters
//! - Forwarding stream start/stop so both endpoints stream together

use std::time::Duration;

use crate::error::{Error, Result};

/// SlaveGateway instance
pub struct SlaveGateway {
    client: reqwest::Client,
    base_url: String,
}

impl SlaveGateway {
    /// Create new SlaveGateway
    pub fn new(host: &str, port: u16) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: format!("http://{host}:{port}"),
        }
    }

    /// POST the capture parameters to the slave's prepare endpoint.
    pub async fn prepare(&self, params: &[(String, String)]) -> Result<()> {
        let url = format!("{}/api/capture", self.base_url);
        let resp = self.client.post(&url).form(params).send().await?;

        if resp.status().is_success() {
            return Ok(());
        }
        Err(Error::Internal(format!(
            "Slave prepare refused: {} - {}",
            resp.status(),
            resp.text().await.unwrap_or_default()
        )))
    }

    /// Forward a stream start/stop command. Best-effort; callers log and
    /// continue on failure.
    pub async fn stream_cmd(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(Error::Internal(format!(
            "Slave stream command failed: {}",
            resp.status()
        )))
    }
}
