//! RPC transport to the exchange's action and info endpoints.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PerpdeskError, Result};
use crate::exchange::types::ExchangeResponse;

/// Default mainnet API endpoint.
pub const MAINNET_API_URL: &str = "https://api.hyperliquid.xyz";

/// Transport used by the exchange client. Implemented over HTTPS in
/// production and by in-process fakes in tests.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// Submit a signed action envelope and return the normalized response.
    async fn exchange(&self, payload: Value) -> Result<ExchangeResponse>;

    /// Submit a read request to the info endpoint.
    async fn info(&self, request: Value) -> Result<Value>;
}

/// HTTPS transport.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn mainnet() -> Self {
        Self::new(MAINNET_API_URL)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[async_trait]
impl ExchangeTransport for HttpTransport {
    async fn exchange(&self, payload: Value) -> Result<ExchangeResponse> {
        let response = self
            .http
            .post(format!("{}/exchange", self.base_url))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Error statuses still carry the normalized {status:"err"} body when
        // the request reached the matching engine.
        match serde_json::from_str::<ExchangeResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(PerpdeskError::ExchangeRequest(format!(
                "HTTP {status}: {body}"
            ))),
        }
    }

    async fn info(&self, request: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}/info", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PerpdeskError::ExchangeRequest(format!(
                "HTTP {status}: {body}"
            )));
        }
        Ok(response.json().await?)
    }
}
