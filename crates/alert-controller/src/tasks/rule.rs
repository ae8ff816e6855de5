//! Scope-independent view of alert rules and notifier channels.

use crate::crds::{AlertState, ChannelConfig, ClusterAlert, Notifier, ProjectAlert, RuleSpec};
use kube::ResourceExt;
use std::fmt;

/// Label Alertmanager alerts, routes and silences are correlated on
pub const ALERT_ID_LABEL: &str = "alert_id";

/// Stable `namespace-name` identity of a rule as seen by Alertmanager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertIdentity(String);

impl AlertIdentity {
    #[must_use]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}-{name}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Cluster,
    Project,
}

/// An alert rule regardless of whether it came from a `ClusterAlert` or a `ProjectAlert`
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub namespace: String,
    pub name: String,
    pub scope: RuleScope,
    pub spec: RuleSpec,
    pub state: AlertState,
    /// Used as the precondition when persisting state
    pub resource_version: Option<String>,
}

impl AlertRule {
    #[must_use]
    pub fn identity(&self) -> AlertIdentity {
        AlertIdentity::new(&self.namespace, &self.name)
    }

    /// Key the restart tracker stores samples under
    #[must_use]
    pub fn tracking_key(&self) -> String {
        tracking_key(&self.namespace, &self.name)
    }

    #[must_use]
    pub fn is_inactive(&self) -> bool {
        self.state == AlertState::Inactive
    }

    #[must_use]
    pub fn from_cluster_alert(alert: &ClusterAlert) -> Self {
        Self {
            namespace: alert.namespace().unwrap_or_default(),
            name: alert.name_any(),
            scope: RuleScope::Cluster,
            spec: alert.spec.rule.clone(),
            state: alert.status.as_ref().map(|s| s.state).unwrap_or_default(),
            resource_version: alert.resource_version(),
        }
    }

    #[must_use]
    pub fn from_project_alert(alert: &ProjectAlert) -> Self {
        Self {
            namespace: alert.namespace().unwrap_or_default(),
            name: alert.name_any(),
            scope: RuleScope::Project,
            spec: alert.spec.rule.clone(),
            state: alert.status.as_ref().map(|s| s.state).unwrap_or_default(),
            resource_version: alert.resource_version(),
        }
    }
}

/// Restart tracker key for a rule
#[must_use]
pub fn tracking_key(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

/// A notifier resolved under its `<cluster>:<name>` id
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierChannel {
    pub id: String,
    pub config: ChannelConfig,
}

impl NotifierChannel {
    #[must_use]
    pub fn from_notifier(cluster_name: &str, notifier: &Notifier) -> Self {
        Self {
            id: format!("{cluster_name}:{}", notifier.name_any()),
            config: notifier.spec.channel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::alert::SystemComponentTarget;
    use crate::crds::notifier::WebhookConfig;
    use crate::crds::{AlertCondition, AlertStatus, ClusterAlertSpec, NotifierSpec, Severity};

    fn rule_spec() -> RuleSpec {
        RuleSpec {
            display_name: "etcd".to_string(),
            description: String::new(),
            severity: Severity::Critical,
            initial_wait_seconds: 60,
            repeat_interval_seconds: 600,
            condition: AlertCondition::SystemComponentUnhealthy(SystemComponentTarget {
                component: "etcd".to_string(),
            }),
            recipients: vec![],
        }
    }

    #[test]
    fn identity_is_namespace_dash_name() {
        assert_eq!(AlertIdentity::new("p1", "r1").as_str(), "p1-r1");
        assert_eq!(AlertIdentity::new("p1", "r1").to_string(), "p1-r1");
    }

    #[test]
    fn cluster_alert_conversion() {
        let mut alert = ClusterAlert::new(
            "etcd-down",
            ClusterAlertSpec {
                cluster_name: "c-abc".to_string(),
                rule: rule_spec(),
            },
        );
        alert.metadata.namespace = Some("c-abc".to_string());
        alert.metadata.resource_version = Some("42".to_string());

        let rule = AlertRule::from_cluster_alert(&alert);
        assert_eq!(rule.identity().as_str(), "c-abc-etcd-down");
        assert_eq!(rule.tracking_key(), "c-abc:etcd-down");
        assert_eq!(rule.scope, RuleScope::Cluster);
        assert_eq!(rule.state, AlertState::Active);
        assert_eq!(rule.resource_version.as_deref(), Some("42"));

        alert.status = Some(AlertStatus {
            state: AlertState::Inactive,
        });
        assert!(AlertRule::from_cluster_alert(&alert).is_inactive());
    }

    #[test]
    fn notifier_id_uses_configured_cluster() {
        let notifier = Notifier::new(
            "hook",
            NotifierSpec {
                cluster_name: "c-abc".to_string(),
                display_name: String::new(),
                channel: ChannelConfig::Webhook(WebhookConfig {
                    url: "http://hook".to_string(),
                }),
            },
        );
        assert_eq!(NotifierChannel::from_notifier("c-abc", &notifier).id, "c-abc:hook");
    }
}
