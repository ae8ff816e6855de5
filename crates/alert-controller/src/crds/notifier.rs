//! `Notifier` Custom Resource Definition for notification channels

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_smtp_port() -> u16 {
    587
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Incoming webhook URL
    pub url: String,
    /// Channel used when a recipient binding carries no override
    pub default_recipient: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// `From` address
    pub sender: String,
    pub default_recipient: String,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PagerdutyConfig {
    pub service_key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
}

/// Exactly one channel type per notifier
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ChannelConfig {
    Slack(SlackConfig),
    Smtp(SmtpConfig),
    Pagerduty(PagerdutyConfig),
    Webhook(WebhookConfig),
}

/// Notification channel definition, stored in the namespace named after its cluster
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "Notifier")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Display","type":"string","jsonPath":".spec.displayName"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct NotifierSpec {
    pub cluster_name: String,

    #[serde(default)]
    pub display_name: String,

    pub channel: ChannelConfig,
}

impl NotifierSpec {
    #[must_use]
    pub fn in_cluster(&self, cluster_name: &str) -> bool {
        self.cluster_name == cluster_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_channel_defaults_port() {
        let spec: NotifierSpec = serde_json::from_value(serde_json::json!({
            "clusterName": "c-abc",
            "channel": {
                "smtp": {
                    "host": "smtp.example.com",
                    "sender": "alerts@example.com",
                    "defaultRecipient": "ops@example.com"
                }
            }
        }))
        .unwrap();
        match &spec.channel {
            ChannelConfig::Smtp(smtp) => {
                assert_eq!(smtp.port, 587);
                assert!(!smtp.tls);
                assert!(smtp.username.is_empty());
            }
            other => panic!("unexpected channel {other:?}"),
        }
        assert!(spec.in_cluster("c-abc"));
        assert!(!spec.in_cluster("c-other"));
    }
}
