//! Client for the platform's user sync endpoint.
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::model::{ProbeInfo, SyncOutcome, SyncRequest, SyncResponse, User};

pub const API_KEY_HEADER: &str = "X-AD-Sync-Api-Key";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("invalid platform URL: {0}")]
    InvalidUrl(String),
    #[error("platform request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("platform returned {status}: {message}")]
    Protocol { status: u16, message: String },
    #[error("invalid platform response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// Submits user batches and probes connectivity.
#[async_trait]
pub trait SyncReporter: Send + Sync {
    /// Reachability and authentication check. Only the status code matters.
    async fn probe(&self) -> Result<ProbeInfo, PlatformError>;

    /// Submit the whole batch in one request. An empty batch is a no-op.
    async fn submit(&self, users: &[User]) -> Result<SyncOutcome, PlatformError>;
}

#[derive(Clone)]
pub struct PlatformClient {
    http: Client,
    sync_url: Url,
    api_key: String,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformClient")
            .field("sync_url", &self.sync_url)
            .finish_non_exhaustive()
    }
}

impl PlatformClient {
    pub fn from_config(cfg: &Config) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .user_agent(concat!("ad-sync-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            sync_url: sync_url(&cfg.platform.url, &cfg.platform.tenant_id)?,
            api_key: cfg.platform.api_key.clone(),
            request_timeout: cfg.platform.request_timeout(),
            probe_timeout: cfg.platform.probe_timeout(),
        })
    }

    pub fn sync_url(&self) -> &Url {
        &self.sync_url
    }

    pub fn build_submit_request(&self, users: &[User]) -> Result<reqwest::Request, PlatformError> {
        let request = self
            .http
            .request(Method::POST, self.sync_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header("Content-Type", "application/json")
            .json(&SyncRequest { users })
            .timeout(self.request_timeout)
            .build()?;
        Ok(request)
    }

    pub fn build_probe_request(&self) -> Result<reqwest::Request, PlatformError> {
        let request = self
            .http
            .request(Method::GET, self.sync_url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.probe_timeout)
            .build()?;
        Ok(request)
    }
}

#[async_trait]
impl SyncReporter for PlatformClient {
    #[instrument(skip_all)]
    async fn probe(&self) -> Result<ProbeInfo, PlatformError> {
        let request = self.build_probe_request()?;
        let res = self.http.execute(request).await?;
        let status = res.status();

        if status != StatusCode::OK {
            let message = error_message(&res.text().await?);
            warn!(%status, %message, "platform connectivity probe failed");
            return Err(PlatformError::Protocol {
                status: status.as_u16(),
                message,
            });
        }

        // Only the status decides reachability; a lost body just means no tenant info.
        let body = res.text().await.unwrap_or_default();
        let probe = parse_probe_info(&body);
        info!(
            tenant = probe.tenant_name.as_deref().unwrap_or("unknown"),
            user_count = ?probe.user_count,
            "platform connection successful"
        );
        Ok(probe)
    }

    #[instrument(skip_all, fields(users = users.len()))]
    async fn submit(&self, users: &[User]) -> Result<SyncOutcome, PlatformError> {
        if users.is_empty() {
            warn!("no users to sync");
            return Ok(SyncOutcome::default());
        }

        let request = self.build_submit_request(users)?;
        info!(url = %request.url(), "sending users to platform");

        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;

        if status != StatusCode::OK {
            let message = error_message(&body);
            warn!(%status, %message, "platform rejected sync");
            return Err(PlatformError::Protocol {
                status: status.as_u16(),
                message,
            });
        }

        let payload: SyncResponse = serde_json::from_str(&body)?;
        if !payload.success {
            warn!(message = %payload.message, "platform answered 200 without success flag");
        }

        let outcome = payload.results;
        info!(
            created = outcome.created,
            updated = outcome.updated,
            errors = outcome.errors.len(),
            message = %payload.message,
            "sync successful"
        );
        for err in &outcome.errors {
            warn!(email = %err.email, error = %err.error, "platform rejected user");
        }
        Ok(outcome)
    }
}

/// `{base}/api/tenants/{tenant_id}/sync/users`, keeping any path prefix on `base`.
pub fn sync_url(base: &str, tenant_id: &str) -> Result<Url, PlatformError> {
    let mut url = Url::parse(base.trim()).map_err(|e| PlatformError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| PlatformError::InvalidUrl(format!("'{}' cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(["api", "tenants", tenant_id, "sync", "users"]);
    Ok(url)
}

/// Message for a non-200 response: the structured `error` field when the body
/// is a JSON error object, the raw body otherwise.
pub fn error_message(body: &str) -> String {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        if let Some(error) = obj.get("error") {
            let mut message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if let Some(details) = obj.get("details").filter(|d| !d.is_null()) {
                message.push_str(&format!(" ({})", details));
            }
            return message;
        }
    }
    let raw = body.trim();
    if raw.is_empty() {
        "empty response body".to_string()
    } else {
        raw.to_string()
    }
}

/// Best-effort parse of the probe body; anything unexpected yields empty fields.
pub fn parse_probe_info(body: &str) -> ProbeInfo {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return ProbeInfo::default();
    };
    let user_count = &value["userCount"];
    ProbeInfo {
        tenant_name: value["tenant"]["name"].as_str().map(str::to_string),
        user_count: user_count
            .as_u64()
            .or_else(|| user_count.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64)),
    }
}
