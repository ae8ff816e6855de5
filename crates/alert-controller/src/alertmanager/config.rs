//! Alertmanager routing configuration document.
//!
//! Only the subset of the Alertmanager schema this controller writes is modeled.
//! Maps are `BTreeMap` so serialization order is canonical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_RECEIVER: &str = "alert-controller-default";
pub const PAGERDUTY_EVENTS_URL: &str =
    "https://events.pagerduty.com/generic/2010-04-15/create_event.json";

/// Render a whole number of seconds the way Alertmanager parses durations
#[must_use]
pub fn format_duration(seconds: u32) -> String {
    format!("{seconds}s")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertmanagerConfig {
    pub global: GlobalConfig,
    pub route: Route,
    pub receivers: Vec<Receiver>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub resolve_timeout: String,
    pub smtp_require_tls: bool,
    pub pagerduty_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub receiver: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub r#match: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slack_configs: Vec<SlackReceiverConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_configs: Vec<EmailReceiverConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pagerduty_configs: Vec<PagerdutyReceiverConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook_configs: Vec<WebhookReceiverConfig>,
}

impl Receiver {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Total number of channel configs across all types
    #[must_use]
    pub fn config_count(&self) -> usize {
        self.slack_configs.len()
            + self.email_configs.len()
            + self.pagerduty_configs.len()
            + self.webhook_configs.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackReceiverConfig {
    pub api_url: String,
    pub channel: String,
    pub title: String,
    pub text: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailReceiverConfig {
    pub to: String,
    pub from: String,
    pub smarthost: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_password: String,
    pub require_tls: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagerdutyReceiverConfig {
    pub service_key: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookReceiverConfig {
    pub url: String,
}

impl AlertmanagerConfig {
    /// Engine-level defaults: one catch-all receiver and the root route
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            global: GlobalConfig {
                resolve_timeout: "5m".to_string(),
                smtp_require_tls: false,
                pagerduty_url: PAGERDUTY_EVENTS_URL.to_string(),
            },
            route: Route {
                receiver: DEFAULT_RECEIVER.to_string(),
                r#match: BTreeMap::new(),
                group_wait: Some("1m".to_string()),
                group_interval: Some("10s".to_string()),
                repeat_interval: Some("1h".to_string()),
                routes: Vec::new(),
            },
            receivers: vec![Receiver::named(DEFAULT_RECEIVER)],
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
