//! Access to alert rules and notifiers stored as custom resources.

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::crds::{AlertState, ClusterAlert, Notifier, ProjectAlert};
use crate::tasks::rule::{AlertRule, NotifierChannel, RuleScope};
use crate::tasks::types::Result;

/// Rule and notifier storage as seen by the synchronizers.
///
/// Listings leave out objects that are being deleted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Cluster rules of the served cluster
    async fn list_cluster_rules(&self) -> Result<Vec<AlertRule>>;

    /// Project rules whose project belongs to the served cluster
    async fn list_project_rules(&self) -> Result<Vec<AlertRule>>;

    async fn list_notifiers(&self) -> Result<Vec<NotifierChannel>>;

    /// Conditionally write `state` to the rule's status
    async fn update_rule_status(&self, rule: &AlertRule, state: AlertState) -> Result<()>;
}

/// [`RuleStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeRuleStore {
    client: Client,
    cluster_name: String,
}

impl KubeRuleStore {
    #[must_use]
    pub fn new(client: Client, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
        }
    }
}

/// Merge patch setting the status, guarded by `resourceVersion` when known
pub(crate) fn status_patch(state: AlertState, resource_version: Option<&str>) -> serde_json::Value {
    match resource_version {
        Some(rv) => json!({
            "metadata": { "resourceVersion": rv },
            "status": { "state": state },
        }),
        None => json!({ "status": { "state": state } }),
    }
}

#[async_trait]
impl RuleStore for KubeRuleStore {
    async fn list_cluster_rules(&self) -> Result<Vec<AlertRule>> {
        let api: Api<ClusterAlert> = Api::namespaced(self.client.clone(), &self.cluster_name);
        let alerts = api.list(&ListParams::default()).await?;
        Ok(alerts
            .items
            .iter()
            .filter(|alert| alert.metadata.deletion_timestamp.is_none())
            .filter(|alert| alert.spec.in_cluster(&self.cluster_name))
            .map(AlertRule::from_cluster_alert)
            .collect())
    }

    async fn list_project_rules(&self) -> Result<Vec<AlertRule>> {
        let api: Api<ProjectAlert> = Api::all(self.client.clone());
        let alerts = api.list(&ListParams::default()).await?;
        Ok(alerts
            .items
            .iter()
            .filter(|alert| alert.metadata.deletion_timestamp.is_none())
            .filter(|alert| alert.spec.in_cluster(&self.cluster_name))
            .map(AlertRule::from_project_alert)
            .collect())
    }

    async fn list_notifiers(&self) -> Result<Vec<NotifierChannel>> {
        let api: Api<Notifier> = Api::namespaced(self.client.clone(), &self.cluster_name);
        let notifiers = api.list(&ListParams::default()).await?;
        Ok(notifiers
            .items
            .iter()
            .filter(|n| n.metadata.deletion_timestamp.is_none())
            .filter(|n| n.spec.in_cluster(&self.cluster_name))
            .map(|n| NotifierChannel::from_notifier(&self.cluster_name, n))
            .collect())
    }

    async fn update_rule_status(&self, rule: &AlertRule, state: AlertState) -> Result<()> {
        let patch = status_patch(state, rule.resource_version.as_deref());
        let params = PatchParams::default();
        match rule.scope {
            RuleScope::Cluster => {
                let api: Api<ClusterAlert> = Api::namespaced(self.client.clone(), &rule.namespace);
                api.patch_status(&rule.name, &params, &Patch::Merge(&patch))
                    .await?;
            }
            RuleScope::Project => {
                let api: Api<ProjectAlert> = Api::namespaced(self.client.clone(), &rule.namespace);
                api.patch_status(&rule.name, &params, &Patch::Merge(&patch))
                    .await?;
            }
        }
        debug!(alert_id = %rule.identity(), state = %state, "Persisted rule state");
        Ok(())
    }
}
