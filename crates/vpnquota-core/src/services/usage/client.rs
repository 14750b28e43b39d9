//! Accounting RPC client
//!
//! One call shape for every action: `POST {base_url}/usage/ping?key={api_key}`
//! with a [`SyncRequest`] body, answered by a [`ServerUsage`] body.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use thiserror::Error;

use super::types::{ServerUsage, SyncRequest};
use crate::config::AppConfig;
use crate::utils::parse_date;

/// Path of the accounting endpoint
pub const USAGE_PING_PATH: &str = "/usage/ping";

// ============================================================================
// Error Types
// ============================================================================

/// Errors from the accounting RPC
#[derive(Error, Debug)]
pub enum UsageClientError {
    /// Key rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Non-2xx answer
    #[error("API error: {0}")]
    ApiError(String),

    /// Undecodable body
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Transport failure
    #[error("Network error: {0}")]
    NetworkError(String),

    /// TCP/TLS connection could not be established
    #[error("Connection failed")]
    ConnectFailed,

    /// Client misconfigured
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UsageClientError {
    /// Whether the server was never reached
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            UsageClientError::NetworkError(_) | UsageClientError::ConnectFailed
        )
    }
}

impl From<reqwest::Error> for UsageClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UsageClientError::NetworkError("Request timed out".to_string())
        } else if err.is_connect() {
            UsageClientError::ConnectFailed
        } else if err.is_status() {
            match err.status() {
                Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                    UsageClientError::Unauthorized(format!("HTTP {}", status))
                }
                Some(status) => UsageClientError::ApiError(format!("HTTP {}", status)),
                None => UsageClientError::NetworkError(err.to_string()),
            }
        } else if err.is_decode() {
            UsageClientError::ParseError(err.to_string())
        } else {
            UsageClientError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UsageClientError {
    fn from(err: serde_json::Error) -> Self {
        UsageClientError::ParseError(err.to_string())
    }
}

// ============================================================================
// Client Trait
// ============================================================================

/// The remote accounting service
#[async_trait]
pub trait RemoteUsageClient: Send + Sync {
    /// Report usage or perform a reward action, returning the server's view
    async fn sync(&self, request: &SyncRequest) -> Result<ServerUsage, UsageClientError>;
}

// ============================================================================
// HTTP Client
// ============================================================================

/// reqwest-backed accounting client
#[derive(Debug, Clone)]
pub struct HttpUsageClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpUsageClient {
    /// Build a client from validated configuration
    pub fn from_config(config: &AppConfig) -> Result<Self, UsageClientError> {
        config
            .require_remote()
            .map_err(|e| UsageClientError::Config(e.to_string()))?;
        Self::new(
            &config.base_url,
            &config.api_key,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn new(
        base_url: &str,
        api_key: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, UsageClientError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| UsageClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, USAGE_PING_PATH)
    }

    async fn post_once(&self, request: &SyncRequest) -> Result<ServerUsage, UsageClientError> {
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        log::debug!("[usage:client] Response status: {}", status);

        if status == 401 || status == 403 {
            log::warn!("[usage:client] Key rejected: HTTP {}", status);
            return Err(UsageClientError::Unauthorized(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("[usage:client] API error: HTTP {} - {}", status, body);
            return Err(UsageClientError::ApiError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        // Default for a missing last_login_date is the date we sent
        let today = parse_date(&request.last_login)
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        parse_response(&body, today)
    }
}

/// Decode a response body; nothing is applied from a malformed body
pub fn parse_response(body: &str, today: NaiveDate) -> Result<ServerUsage, UsageClientError> {
    ServerUsage::from_json(body, today).map_err(|e| {
        log::error!("[usage:client] Failed to parse response: {}", e);
        UsageClientError::ParseError(format!("Invalid response: {}", e))
    })
}

#[async_trait]
impl RemoteUsageClient for HttpUsageClient {
    async fn sync(&self, request: &SyncRequest) -> Result<ServerUsage, UsageClientError> {
        log::debug!(
            "[usage:client] {} add_mb={} exchange_mb={} cost={}",
            request.action_type,
            request.add_mb,
            request.exchange_mb,
            request.cost
        );

        match self.post_once(request).await {
            Err(UsageClientError::ConnectFailed) => {
                log::info!("[usage:client] Connection failed, retrying once");
                self.post_once(request).await
            }
            other => other,
        }
    }
}
