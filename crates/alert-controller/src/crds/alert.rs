//! `ClusterAlert` and `ProjectAlert` Custom Resource Definitions

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default function for `initial_wait_seconds` field
fn default_initial_wait_seconds() -> u32 {
    180
}

/// Default function for `repeat_interval_seconds` field
fn default_repeat_interval_seconds() -> u32 {
    3600
}

/// Severity attached to every alert fired for a rule
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state recorded on an alert rule
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// Rule is evaluated and nothing is firing
    #[default]
    Active,
    /// Alertmanager reports a live, unsuppressed alert for the rule
    Alerting,
    /// Operator silenced the rule
    Muted,
    /// Rule is switched off; never reconciled
    Inactive,
}

impl AlertState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Alerting => "alerting",
            Self::Muted => "muted",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status subresource shared by both alert kinds
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct AlertStatus {
    #[serde(default)]
    pub state: AlertState,
}

/// Binding from a rule to a notifier, optionally overriding its destination
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// Notifier id in the form `<cluster>:<notifier-name>`
    pub notifier_id: String,

    /// Slack channel, email address, PagerDuty service key or webhook URL
    /// used instead of the notifier's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

/// How a condition selects the objects it watches
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum TargetSelector {
    /// A single object id (`namespace:name`, or `cluster:name` for nodes)
    Id(String),
    /// Every object carrying all of these labels
    Selector(BTreeMap<String, String>),
}

/// Node resource measured by a threshold condition
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeResource {
    Cpu,
    Memory,
}

/// Workload kind watched by an unavailability condition
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeTarget {
    pub target: TargetSelector,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeResourceTarget {
    pub target: TargetSelector,
    pub resource: NodeResource,
    pub threshold_percent: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadTarget {
    pub workload_kind: WorkloadKind,
    pub target: TargetSelector,
    pub unavailable_percentage: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTarget {
    /// `namespace:name`
    pub pod_id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodRestartTarget {
    /// `namespace:name`
    pub pod_id: String,
    /// Restarts within the interval that trigger the alert
    pub restart_times: u32,
    /// Comparison window in seconds
    pub restart_interval_seconds: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemComponentTarget {
    /// Component status name prefix, e.g. `etcd` or `scheduler`
    pub component: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventTarget {
    pub event_type: String,
    pub resource_kind: String,
}

/// The health condition an alert rule watches. Exactly one kind per rule.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AlertCondition {
    NodeNotReady(NodeTarget),
    NodeResourceThreshold(NodeResourceTarget),
    WorkloadUnavailable(WorkloadTarget),
    PodNotRunning(PodTarget),
    PodNotScheduled(PodTarget),
    PodRestartRate(PodRestartTarget),
    SystemComponentUnhealthy(SystemComponentTarget),
    WarningEvent(EventTarget),
}

impl AlertCondition {
    /// Restart-rate parameters, when this is a pod restart-rate condition
    #[must_use]
    pub fn restart_rate(&self) -> Option<&PodRestartTarget> {
        match self {
            Self::PodRestartRate(target) => Some(target),
            _ => None,
        }
    }
}

/// Fields common to cluster and project alert rules
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub severity: Severity,

    /// Mapped to the route's `group_wait`
    #[serde(default = "default_initial_wait_seconds")]
    pub initial_wait_seconds: u32,

    /// Mapped to the route's `repeat_interval`
    #[serde(default = "default_repeat_interval_seconds")]
    pub repeat_interval_seconds: u32,

    pub condition: AlertCondition,

    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

/// Cluster-scoped alert rule, stored in the namespace named after its cluster
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "ClusterAlert")]
#[kube(namespaced)]
#[kube(status = "AlertStatus")]
#[kube(printcolumn = r#"{"name":"Display","type":"string","jsonPath":".spec.displayName"}"#)]
#[kube(printcolumn = r#"{"name":"Severity","type":"string","jsonPath":".spec.severity"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAlertSpec {
    pub cluster_name: String,

    #[serde(flatten)]
    pub rule: RuleSpec,
}

/// Project-scoped alert rule
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "management.cattle.io", version = "v3", kind = "ProjectAlert")]
#[kube(namespaced)]
#[kube(status = "AlertStatus")]
#[kube(printcolumn = r#"{"name":"Project","type":"string","jsonPath":".spec.projectName"}"#)]
#[kube(printcolumn = r#"{"name":"Severity","type":"string","jsonPath":".spec.severity"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAlertSpec {
    /// `<cluster>:<project>`
    pub project_name: String,

    #[serde(flatten)]
    pub rule: RuleSpec,
}

impl ClusterAlertSpec {
    #[must_use]
    pub fn in_cluster(&self, cluster_name: &str) -> bool {
        self.cluster_name == cluster_name
    }
}

impl ProjectAlertSpec {
    /// Whether the owning project belongs to `cluster_name`
    #[must_use]
    pub fn in_cluster(&self, cluster_name: &str) -> bool {
        self.project_name
            .split_once(':')
            .is_some_and(|(cluster, _)| cluster == cluster_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_alert_spec_parses_tagged_condition() {
        let yaml = r"
projectName: c-abc:p-xyz
displayName: api restarts
severity: critical
condition:
  kind: podRestartRate
  podId: default:api-0
  restartTimes: 3
  restartIntervalSeconds: 300
recipients:
  - notifierId: c-abc:n-slack
    recipient: '#oncall'
";
        let spec: ProjectAlertSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.rule.severity, Severity::Critical);
        assert_eq!(spec.rule.initial_wait_seconds, 180);
        assert_eq!(spec.rule.repeat_interval_seconds, 3600);
        let restart = spec.rule.condition.restart_rate().unwrap();
        assert_eq!(restart.pod_id, "default:api-0");
        assert_eq!(restart.restart_times, 3);
        assert_eq!(
            spec.rule.recipients[0].recipient.as_deref(),
            Some("#oncall")
        );
    }

    #[test]
    fn node_condition_uses_selector() {
        let yaml = r"
clusterName: c-abc
displayName: workers not ready
condition:
  kind: nodeNotReady
  target:
    selector:
      role: worker
";
        let spec: ClusterAlertSpec = serde_yaml::from_str(yaml).unwrap();
        match &spec.rule.condition {
            AlertCondition::NodeNotReady(NodeTarget {
                target: TargetSelector::Selector(labels),
            }) => assert_eq!(labels.get("role").map(String::as_str), Some("worker")),
            other => panic!("unexpected condition {other:?}"),
        }
        assert!(spec.rule.condition.restart_rate().is_none());
    }

    #[test]
    fn in_cluster_matches_project_prefix() {
        let spec = ProjectAlertSpec {
            project_name: "c-abc:p-xyz".to_string(),
            rule: RuleSpec {
                display_name: "x".to_string(),
                description: String::new(),
                severity: Severity::Info,
                initial_wait_seconds: 1,
                repeat_interval_seconds: 1,
                condition: AlertCondition::PodNotRunning(PodTarget {
                    pod_id: "ns:pod".to_string(),
                }),
                recipients: vec![],
            },
        };
        assert!(spec.in_cluster("c-abc"));
        assert!(!spec.in_cluster("c-ab"));
        assert!(!spec.in_cluster("c-other"));
    }

    #[test]
    fn cluster_alert_membership_uses_cluster_name() {
        let spec: ClusterAlertSpec = serde_json::from_value(serde_json::json!({
            "clusterName": "c-abc",
            "displayName": "etcd",
            "condition": {"kind": "systemComponentUnhealthy", "component": "etcd"}
        }))
        .unwrap();
        assert!(spec.in_cluster("c-abc"));
        assert!(!spec.in_cluster("c-other"));
    }

    #[test]
    fn state_serializes_lowercase() {
        let status = AlertStatus {
            state: AlertState::Muted,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"state": "muted"})
        );
        assert_eq!(AlertState::Alerting.to_string(), "alerting");
    }
}
