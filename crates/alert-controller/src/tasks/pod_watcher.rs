//! Pod restart-rate watcher.
//!
//! Polls the pods targeted by restart-rate rules, feeds their restart counts to the
//! [`RestartTracker`] and fires an alert when the increase inside the rule's window
//! reaches its threshold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alertmanager::{AlertEngine, FiredAlert};
use crate::crds::alert::PodRestartTarget;
use crate::tasks::restart::RestartTracker;
use crate::tasks::rule::AlertRule;
use crate::tasks::store::RuleStore;
use crate::tasks::types::{Error, Result};

/// Read access to pods
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodSource: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;
}

pub struct KubePodSource {
    client: Client,
}

impl KubePodSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodSource for KubePodSource {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.get_opt(name).await?)
    }
}

/// Split a `namespace:name` pod id
pub fn parse_pod_id(pod_id: &str) -> Result<(&str, &str)> {
    match pod_id.split_once(':') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        _ => Err(Error::InvalidTarget(pod_id.to_string())),
    }
}

fn first_not_running(pod: &Pod) -> Option<&ContainerStatus> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|cs| cs.state.as_ref().is_none_or(|s| s.running.is_none()))
}

fn waiting_message(status: &ContainerStatus) -> String {
    status
        .state
        .as_ref()
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.message.clone())
        .unwrap_or_default()
}

/// Feed the first non-running container of `pod` to the tracker and build an alert
/// when the rule's threshold is reached. Pods whose containers all run are not
/// sampled, and neither are rules the tracker holds no history for.
pub fn check_pod_restarts(
    pod: &Pod,
    rule: &AlertRule,
    target: &PodRestartTarget,
    tracker: &RestartTracker,
    cluster_name: &str,
    now: DateTime<Utc>,
) -> Option<FiredAlert> {
    let container = first_not_running(pod)?;
    let window = chrono::Duration::seconds(i64::from(target.restart_interval_seconds));
    let observation = tracker.observe(&rule.tracking_key(), container.restart_count, now, window)?;

    if !observation.exceeds(container.restart_count, target.restart_times) {
        return None;
    }

    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    Some(FiredAlert {
        identity: rule.identity(),
        title: format!(
            "The Pod {pod_name} restarts {} times in {} seconds",
            target.restart_times, target.restart_interval_seconds
        ),
        text: format!(
            "*Alert Name*: {}\n*Cluster Name*: {cluster_name}\n*Namespace*: {namespace}\n*Container Name*: {}\n*Logs*: {}",
            rule.spec.display_name,
            container.name,
            waiting_message(container),
        ),
        severity: rule.spec.severity.to_string(),
    })
}

pub struct PodRestartWatcher {
    store: Arc<dyn RuleStore>,
    pods: Arc<dyn PodSource>,
    engine: Arc<dyn AlertEngine>,
    tracker: Arc<RestartTracker>,
    cluster_name: String,
    interval: Duration,
}

impl PodRestartWatcher {
    pub fn new(
        store: Arc<dyn RuleStore>,
        pods: Arc<dyn PodSource>,
        engine: Arc<dyn AlertEngine>,
        tracker: Arc<RestartTracker>,
        cluster_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            pods,
            engine,
            tracker,
            cluster_name: cluster_name.into(),
            interval,
        }
    }

    /// Check every restart-rate rule once; returns the number of alerts fired
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut rules = self.store.list_cluster_rules().await?;
        rules.extend(self.store.list_project_rules().await?);

        let mut fired = 0;
        for rule in rules.iter().filter(|r| !r.is_inactive()) {
            let Some(target) = rule.spec.condition.restart_rate() else {
                continue;
            };
            match self.check_rule(rule, target, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(alert_id = %rule.identity(), error = %e, "Pod restart check failed");
                }
            }
        }
        Ok(fired)
    }

    async fn check_rule(
        &self,
        rule: &AlertRule,
        target: &PodRestartTarget,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // removed or not yet reconciled
        if !self.tracker.is_tracking(&rule.tracking_key()) {
            debug!(alert_id = %rule.identity(), "Rule has no restart history, skipping");
            return Ok(false);
        }

        let (namespace, name) = parse_pod_id(&target.pod_id)?;
        let Some(pod) = self.pods.get_pod(namespace, name).await? else {
            debug!(pod = %target.pod_id, "Target pod not found");
            return Ok(false);
        };

        let Some(alert) =
            check_pod_restarts(&pod, rule, target, &self.tracker, &self.cluster_name, now)
        else {
            return Ok(false);
        };
        info!(alert_id = %alert.identity, pod = %target.pod_id, "Pod restart threshold reached");
        self.engine.send_alert(&alert).await?;
        Ok(true)
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Starting pod restart watcher");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.tick(Utc::now()).await {
                error!(error = %e, "Pod restart watcher tick failed");
            }
        }
        info!("Pod restart watcher stopped");
    }
}
