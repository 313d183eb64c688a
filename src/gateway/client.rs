//! HTTP client for the remote authorization server.
//!
//! Three endpoints: `/process` (authorization), `/heartbeat` (liveness) and
//! `/sync_offline` (offline-transaction synchronization). Error kinds are
//! kept apart so the processor's retry policy is a plain match: transport
//! failures may fall back to offline approval, server statuses may not.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::Transaction;
use crate::error::TerminalError;
use crate::protocol::MessageType;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("transport failure: {0}")]
    Transport(reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<GatewayError> for TerminalError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transport(e) => TerminalError::Transport(e.to_string()),
            GatewayError::Status(code) => TerminalError::Server(code),
            GatewayError::Decode(msg) => TerminalError::Internal(msg),
        }
    }
}

/// Payload for `POST /process`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub message_type_code: MessageType,
    pub transaction: Transaction,
    pub terminal_id: String,
    pub merchant_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Authorization server verdict.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approval_code: Option<String>,
    #[serde(default)]
    pub response_code: Option<String>,
    #[serde(default)]
    pub response_message: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Payload for `POST /heartbeat`.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    pub terminal_id: String,
    pub merchant_id: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: &'static str,
}

impl HeartbeatRequest {
    pub fn new(terminal_id: &str, merchant_id: &str) -> Self {
        Self {
            terminal_id: terminal_id.to_string(),
            merchant_id: merchant_id.to_string(),
            timestamp: Utc::now(),
            message_type: "heartbeat",
        }
    }
}

/// Payload for `POST /sync_offline`.
#[derive(Debug, Clone, Serialize)]
pub struct OfflineSyncRequest {
    pub transaction: Transaction,
    pub terminal_id: String,
    pub merchant_id: String,
    pub sync_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineSyncResponse {
    pub status: String,
    #[serde(default)]
    pub server_approval_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl OfflineSyncResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Typed client over the authorization server endpoints.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        GatewayClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Submits a transaction for online authorization.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, GatewayError> {
        let response = self
            .client
            .post(self.url("process"))
            .json(request)
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        response
            .json::<AuthorizationResponse>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Lightweight liveness probe. Any non-success status or transport
    /// failure counts as the server being down.
    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url("heartbeat"))
            .json(request)
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        Ok(())
    }

    /// Transmits a locally-approved transaction for reconciliation.
    pub async fn sync_offline(
        &self,
        request: &OfflineSyncRequest,
    ) -> Result<OfflineSyncResponse, GatewayError> {
        let response = self
            .client
            .post(self.url("sync_offline"))
            .json(request)
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        response
            .json::<OfflineSyncResponse>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}
