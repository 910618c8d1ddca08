//! Third-party reference data: current network height and hashrate.
//!
//! Only used as a cross-check for the synced determination and for display.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REFERENCE_URL: &str = "https://mempool.space/api";
const REFERENCE_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSnapshot {
    pub height: u64,
    /// Hashes per second.
    pub hashrate: Option<f64>,
}

#[async_trait]
pub trait ReferenceSource: Send + Sync {
    async fn fetch(&self) -> Result<ReferenceSnapshot>;
}

#[derive(Debug, Deserialize)]
struct HashrateResponse {
    #[serde(rename = "currentHashrate")]
    current_hashrate: f64,
}

/// mempool.space-compatible HTTP API.
#[derive(Debug)]
pub struct HttpReference {
    client: Client,
    base_url: String,
}

impl HttpReference {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(eyre!("reference url is empty"));
        }
        let client = Client::builder()
            .timeout(REFERENCE_TIMEOUT)
            .build()
            .wrap_err("failed to build reference http client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn tip_height(&self) -> Result<u64> {
        let body = self
            .client
            .get(self.endpoint("blocks/tip/height"))
            .send()
            .await
            .wrap_err("tip height request failed")?
            .error_for_status()
            .wrap_err("tip height request rejected")?
            .text()
            .await
            .wrap_err("tip height body unreadable")?;
        body.trim()
            .parse::<u64>()
            .wrap_err_with(|| format!("tip height is not a number: {body:?}"))
    }

    async fn hashrate(&self) -> Result<f64> {
        let response: HashrateResponse = self
            .client
            .get(self.endpoint("v1/mining/hashrate/3d"))
            .send()
            .await
            .wrap_err("hashrate request failed")?
            .error_for_status()
            .wrap_err("hashrate request rejected")?
            .json()
            .await
            .wrap_err("hashrate body malformed")?;
        Ok(response.current_hashrate)
    }
}

#[async_trait]
impl ReferenceSource for HttpReference {
    async fn fetch(&self) -> Result<ReferenceSnapshot> {
        let height = self.tip_height().await?;
        let hashrate = match self.hashrate().await {
            Ok(rate) => Some(rate),
            Err(err) => {
                debug!(error = %err, "reference hashrate unavailable");
                None
            }
        };
        Ok(ReferenceSnapshot { height, hashrate })
    }
}
