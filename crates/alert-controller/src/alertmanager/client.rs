//! HTTP client for the Alertmanager API

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use super::models::{
    ApiEnvelope, EngineAlert, FiredAlert, PostableAlert, PostableSilence, Silence, SilenceMatcher,
};
use crate::tasks::config::ControllerConfig;
use crate::tasks::rule::{AlertIdentity, ALERT_ID_LABEL};
use crate::tasks::types::{Error, Result};

/// Operations the controller needs from the alert-routing engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertEngine: Send + Sync {
    /// Ask the engine to reload its stored configuration
    async fn reload(&self) -> Result<()>;

    /// Live alerts, both firing and suppressed
    async fn list_alerts(&self) -> Result<Vec<EngineAlert>>;

    async fn send_alert(&self, alert: &FiredAlert) -> Result<()>;

    /// Create a silence matching exactly this identity
    async fn add_silence(&self, identity: &AlertIdentity) -> Result<()>;

    /// Expire every active silence matching exactly this identity.
    /// Returns how many were deleted.
    async fn remove_silence(&self, identity: &AlertIdentity) -> Result<usize>;
}

/// reqwest-backed [`AlertEngine`]
#[derive(Debug, Clone)]
pub struct AlertmanagerClient {
    base_url: String,
    client: reqwest::Client,
    silence_duration: chrono::Duration,
    created_by: String,
}

impl AlertmanagerClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        silence_duration: chrono::Duration,
        created_by: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            silence_duration,
            created_by: created_by.into(),
        })
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        Self::new(
            &config.alertmanager.url,
            config.request_timeout(),
            chrono::Duration::days(config.silence.duration_days),
            config.silence.created_by.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Fail on any non-2xx status, keeping the body for diagnostics
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::EngineProtocol {
            status: status.as_u16(),
            body,
        })
    }

    /// Decode a v1 `{status, data}` envelope, rejecting anything but `success`
    async fn envelope<T: DeserializeOwned + Default>(response: Response) -> Result<T> {
        let response = Self::check(response).await?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        if envelope.status != "success" {
            let reason = envelope
                .error
                .map_or(envelope.status.clone(), |e| format!("{}: {e}", envelope.status));
            return Err(Error::EngineStatus(reason));
        }
        Ok(envelope.data.unwrap_or_default())
    }

    async fn list_silences(&self, identity: &AlertIdentity) -> Result<Vec<Silence>> {
        let filter = format!("{{{ALERT_ID_LABEL}=\"{identity}\"}}");
        let response = self
            .client
            .get(self.url("/api/v1/silences"))
            .query(&[("filter", filter)])
            .send()
            .await?;
        Self::envelope(response).await
    }
}

#[async_trait]
impl AlertEngine for AlertmanagerClient {
    async fn reload(&self) -> Result<()> {
        let response = self.client.post(self.url("/-/reload")).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<EngineAlert>> {
        let response = self.client.get(self.url("/api/v1/alerts")).send().await?;
        Self::envelope(response).await
    }

    async fn send_alert(&self, alert: &FiredAlert) -> Result<()> {
        let body = vec![PostableAlert::from(alert)];
        let response = self
            .client
            .post(self.url("/api/alerts"))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        debug!(alert_id = %alert.identity, "Sent alert");
        Ok(())
    }

    async fn add_silence(&self, identity: &AlertIdentity) -> Result<()> {
        let now = Utc::now();
        let silence = PostableSilence {
            matchers: vec![SilenceMatcher::for_identity(identity)],
            starts_at: now,
            ends_at: now + self.silence_duration,
            created_by: self.created_by.clone(),
            comment: format!("Muted alert {identity}"),
        };
        let response = self
            .client
            .post(self.url("/api/v1/silences"))
            .json(&silence)
            .send()
            .await?;
        let _: serde_json::Value = Self::envelope(response).await?;
        info!(alert_id = %identity, "Created silence");
        Ok(())
    }

    async fn remove_silence(&self, identity: &AlertIdentity) -> Result<usize> {
        let mut removed = 0;
        for silence in self.list_silences(identity).await? {
            if !silence.is_active() || !silence.matches_identity(identity) {
                continue;
            }
            let response = self
                .client
                .delete(self.url(&format!("/api/v1/silence/{}", silence.id)))
                .send()
                .await?;
            Self::check(response).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(alert_id = %identity, removed, "Removed silences");
        }
        Ok(removed)
    }
}
