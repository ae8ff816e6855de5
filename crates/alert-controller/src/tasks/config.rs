//! Alert Controller Configuration
//!
//! Loaded from a mounted YAML file. Every section has defaults so a missing or
//! partial file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main controller configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Cluster whose rules and notifiers this controller serves
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Alertmanager endpoint and config storage location
    #[serde(default)]
    pub alertmanager: AlertmanagerSettings,

    /// Reload retry policy applied after each config publish
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Polling intervals
    #[serde(default)]
    pub sync: SyncConfig,

    /// Restart-rate tracking
    #[serde(default)]
    pub restart: RestartConfig,

    /// Silences created on behalf of muted rules
    #[serde(default)]
    pub silence: SilenceConfig,

    /// Health server
    #[serde(default)]
    pub server: ServerConfig,
}

/// Alertmanager endpoint and config storage location
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerSettings {
    /// Base URL of the Alertmanager API
    #[serde(default = "default_alertmanager_url")]
    pub url: String,

    /// Namespace holding the config secret
    #[serde(default = "default_alertmanager_namespace")]
    pub namespace: String,

    /// Secret holding the serialized routing config
    #[serde(default = "default_secret_name")]
    pub secret_name: String,

    /// Key inside the secret
    #[serde(default = "default_config_key")]
    pub config_key: String,

    /// HTTP client timeout
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadConfig {
    #[serde(default = "default_reload_attempts")]
    pub attempts: u32,

    #[serde(default = "default_reload_delay_seconds")]
    pub delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_state_interval_seconds")]
    pub state_interval_seconds: u64,

    #[serde(default = "default_pod_watch_interval_seconds")]
    pub pod_watch_interval_seconds: u64,

    /// Requeue delay after a failed reconcile
    #[serde(default = "default_error_requeue_seconds")]
    pub error_requeue_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    /// Samples retained per rule regardless of poll frequency
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceConfig {
    #[serde(default = "default_silence_duration_days")]
    pub duration_days: i64,

    #[serde(default = "default_silence_created_by")]
    pub created_by: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_cluster_name() -> String {
    "local".to_string()
}

fn default_alertmanager_url() -> String {
    "http://alertmanager.cattle-alerting.svc:9093".to_string()
}

fn default_alertmanager_namespace() -> String {
    "cattle-alerting".to_string()
}

fn default_secret_name() -> String {
    "alertmanager".to_string()
}

fn default_config_key() -> String {
    "config.yml".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_reload_attempts() -> u32 {
    10
}

fn default_reload_delay_seconds() -> u64 {
    10
}

fn default_state_interval_seconds() -> u64 {
    10
}

fn default_pod_watch_interval_seconds() -> u64 {
    30
}

fn default_error_requeue_seconds() -> u64 {
    30
}

fn default_max_samples() -> usize {
    30
}

fn default_silence_duration_days() -> i64 {
    // ~100 years; the silence lives until the rule is unmuted
    36_500
}

fn default_silence_created_by() -> String {
    "alert-controller".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AlertmanagerSettings {
    fn default() -> Self {
        Self {
            url: default_alertmanager_url(),
            namespace: default_alertmanager_namespace(),
            secret_name: default_secret_name(),
            config_key: default_config_key(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            attempts: default_reload_attempts(),
            delay_seconds: default_reload_delay_seconds(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            state_interval_seconds: default_state_interval_seconds(),
            pod_watch_interval_seconds: default_pod_watch_interval_seconds(),
            error_requeue_seconds: default_error_requeue_seconds(),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
        }
    }
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            duration_days: default_silence_duration_days(),
            created_by: default_silence_created_by(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_cluster_name(),
            alertmanager: AlertmanagerSettings::default(),
            reload: ReloadConfig::default(),
            sync: SyncConfig::default(),
            restart: RestartConfig::default(),
            silence: SilenceConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Validate that the configuration can drive the controller
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.cluster_name.trim().is_empty() {
            return Err(anyhow::anyhow!("clusterName must not be empty"));
        }

        reqwest::Url::parse(&self.alertmanager.url).map_err(|e| {
            anyhow::anyhow!(
                "alertmanager.url '{}' is not a valid URL: {e}",
                self.alertmanager.url
            )
        })?;

        if self.alertmanager.secret_name.is_empty() || self.alertmanager.config_key.is_empty() {
            return Err(anyhow::anyhow!(
                "alertmanager.secretName and alertmanager.configKey must be set"
            ));
        }

        if self.reload.attempts == 0 {
            return Err(anyhow::anyhow!("reload.attempts must be at least 1"));
        }

        if self.sync.state_interval_seconds == 0 || self.sync.pod_watch_interval_seconds == 0 {
            return Err(anyhow::anyhow!("sync intervals must be greater than zero"));
        }

        if self.restart.max_samples == 0 {
            return Err(anyhow::anyhow!("restart.maxSamples must be at least 1"));
        }

        Ok(())
    }

    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        let config: ControllerConfig = serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))?;

        Ok(config)
    }

    #[must_use]
    pub fn state_interval(&self) -> Duration {
        Duration::from_secs(self.sync.state_interval_seconds)
    }

    #[must_use]
    pub fn pod_watch_interval(&self) -> Duration {
        Duration::from_secs(self.sync.pod_watch_interval_seconds)
    }

    #[must_use]
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.sync.error_requeue_seconds)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.alertmanager.request_timeout_seconds)
    }
}
