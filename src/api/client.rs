//! Retrying HTTP client for the upstream market data API
//!
//! Every logical request goes through the rate limiter, then the wire, then
//! response classification. Anything that is not an HTTP 200 carrying a
//! logically-successful JSON body is retried with a flat delay until the
//! attempt budget runs out. The delay is deliberately flat rather than
//! exponential: the rate limiter already dominates throughput.

use crate::api::rate_limiter::RateLimiter;
use crate::config::Config;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Raw wire response, before classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// The wire seam. Production uses [`ReqwestTransport`]; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, params: &[(String, String)]) -> Result<RawResponse> {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(RawResponse { status, body })
    }
}

/// Rate-limited, retrying client
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    rate_limiter: RateLimiter,
    base_url: String,
    api_key: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ApiClient {
    pub fn new(config: &Config, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            rate_limiter: RateLimiter::new(
                config.max_requests_per_window,
                config.window(),
                config.stall_interval(),
            ),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    /// Issue one logical request, retrying transient failures.
    ///
    /// Returns the parsed JSON body on success. After the attempt budget is
    /// exhausted the terminal failure is surfaced; callers must treat it as
    /// "this page could not be fetched" and must not persist partial days.
    pub async fn request(&self, path: &str, params: &[(String, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut params = params.to_vec();
        params.push(("apiKey".to_string(), self.api_key.clone()));

        let mut attempts_left = self.max_attempts;
        loop {
            self.rate_limiter.admit().await;
            attempts_left -= 1;

            let reason = match self.transport.get(&url, &params).await {
                Ok(response) if response.status == 200 => {
                    match serde_json::from_str::<Value>(&response.body) {
                        Ok(json) if logical_success(&json) => return Ok(json),
                        Ok(_) => "response body flagged failure".to_string(),
                        Err(e) => format!("unparsable response body: {}", e),
                    }
                }
                Ok(response) => format!("HTTP {}", response.status),
                Err(e) => e.to_string(),
            };

            if attempts_left == 0 {
                tracing::error!("Exhausted attempts for {}: {}", path, reason);
                return Err(AppError::Api {
                    endpoint: path.to_string(),
                    attempts: self.max_attempts,
                    reason,
                });
            }

            tracing::error!(
                "Could not complete request {} ({}, attempts left: {})",
                path,
                reason,
                attempts_left
            );
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

/// A 200 is only a success if the body agrees: top-level arrays are always
/// successful, objects may carry an explicit `success` flag.
fn logical_success(json: &Value) -> bool {
    match json {
        Value::Array(_) => true,
        Value::Object(map) => map
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        _ => false,
    }
}
