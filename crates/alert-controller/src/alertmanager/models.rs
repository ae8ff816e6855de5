//! Alertmanager HTTP API payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tasks::rule::{AlertIdentity, ALERT_ID_LABEL};

/// `{status, data}` envelope returned by the v1 API
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: String,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineAlertStatus {
    #[serde(default)]
    pub state: String,
}

/// A live alert as reported by `GET /api/v1/alerts`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineAlert {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub status: EngineAlertStatus,
}

impl EngineAlert {
    /// Value of the `alert_id` label, if present
    #[must_use]
    pub fn alert_id(&self) -> Option<&str> {
        self.labels.get(ALERT_ID_LABEL).map(String::as_str)
    }

    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.status.state == "suppressed"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceMatcher {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_regex: bool,
}

impl SilenceMatcher {
    /// Exact matcher on the alert identity label
    #[must_use]
    pub fn for_identity(identity: &AlertIdentity) -> Self {
        Self {
            name: ALERT_ID_LABEL.to_string(),
            value: identity.as_str().to_string(),
            is_regex: false,
        }
    }
}

/// Body of `POST /api/v1/silences`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    pub matchers: Vec<SilenceMatcher>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SilenceStatus {
    #[serde(default)]
    pub state: String,
}

/// A silence as listed by `GET /api/v1/silences`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Silence {
    pub id: String,
    #[serde(default)]
    pub matchers: Vec<SilenceMatcher>,
    #[serde(default)]
    pub status: SilenceStatus,
}

impl Silence {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.state == "active"
    }

    /// Whether this silence targets exactly `identity` and nothing else
    #[must_use]
    pub fn matches_identity(&self, identity: &AlertIdentity) -> bool {
        self.matchers.len() == 1 && self.matchers[0] == SilenceMatcher::for_identity(identity)
    }
}

/// An alert the controller raises itself, e.g. from the restart watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredAlert {
    pub identity: AlertIdentity,
    pub title: String,
    pub text: String,
    pub severity: String,
}

/// Body element of `POST /api/alerts`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostableAlert {
    pub labels: BTreeMap<String, String>,
}

impl From<&FiredAlert> for PostableAlert {
    fn from(alert: &FiredAlert) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(ALERT_ID_LABEL.to_string(), alert.identity.to_string());
        labels.insert("title".to_string(), alert.title.clone());
        labels.insert("text".to_string(), alert.text.clone());
        labels.insert("severity".to_string(), alert.severity.clone());
        Self { labels }
    }
}
