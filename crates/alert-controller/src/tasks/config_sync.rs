//! Rule and notifier reconcilers plus the compile-and-publish path they share.

use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Error as FinalizerError, Event as FinalizerEvent};
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::crds::{AlertState, ClusterAlert, Notifier, ProjectAlert, RuleSpec};
use crate::tasks::compiler::compile;
use crate::tasks::publisher::{ConfigPublisher, ReloadReport};
use crate::tasks::restart::RestartTracker;
use crate::tasks::rule::tracking_key;
use crate::tasks::store::{status_patch, RuleStore};
use crate::tasks::types::{
    Context, Error, Result, CLUSTER_ALERT_FINALIZER_NAME, NOTIFIER_FINALIZER_NAME,
    PROJECT_ALERT_FINALIZER_NAME,
};

/// Rebuilds the routing document from the full rule and notifier set
pub struct ConfigSyncer {
    store: Arc<dyn RuleStore>,
    publisher: ConfigPublisher,
    // compile and store run one at a time so an older snapshot never lands last
    lock: Mutex<()>,
}

impl ConfigSyncer {
    pub fn new(store: Arc<dyn RuleStore>, publisher: ConfigPublisher) -> Self {
        Self {
            store,
            publisher,
            lock: Mutex::new(()),
        }
    }

    /// List everything, compile, store and start a reload cycle
    pub async fn sync(&self) -> Result<JoinHandle<ReloadReport>> {
        let _guard = self.lock.lock().await;

        let mut rules = self.store.list_cluster_rules().await?;
        rules.extend(self.store.list_project_rules().await?);
        let notifiers = self.store.list_notifiers().await?;

        let config = compile(&rules, &notifiers);
        debug!(
            rules = rules.len(),
            notifiers = notifiers.len(),
            "Compiled Alertmanager configuration"
        );
        self.publisher.publish(&config).await
    }
}

fn map_finalizer_error(err: FinalizerError<Error>) -> Error {
    match err {
        FinalizerError::ApplyFailed(err) | FinalizerError::CleanupFailed(err) => err,
        FinalizerError::AddFinalizer(e) | FinalizerError::RemoveFinalizer(e) => Error::KubeError(e),
        FinalizerError::UnnamedObject => Error::MissingObjectKey,
        FinalizerError::InvalidFinalizer => {
            Error::ConfigError("Invalid finalizer name".to_string())
        }
    }
}

#[instrument(skip(alert, ctx), fields(alert = %alert.name_any(), namespace = ?alert.namespace()))]
pub async fn reconcile_cluster_alert(
    alert: Arc<ClusterAlert>,
    ctx: Arc<Context>,
) -> Result<Action> {
    if !alert.spec.in_cluster(&ctx.config.cluster_name) {
        debug!(cluster = %alert.spec.cluster_name, "Alert belongs to another cluster");
        return Ok(Action::await_change());
    }

    let namespace = alert.namespace().ok_or(Error::MissingObjectKey)?;
    let api: Api<ClusterAlert> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, CLUSTER_ALERT_FINALIZER_NAME, alert, |event| async {
        match event {
            FinalizerEvent::Apply(alert) => {
                let initialized = alert.status.is_some();
                apply_rule(&api, alert.as_ref(), &alert.spec.rule, initialized, &ctx).await
            }
            FinalizerEvent::Cleanup(alert) => cleanup_rule(alert.as_ref(), &ctx).await,
        }
    })
    .await
    .map_err(map_finalizer_error)
}

#[instrument(skip(alert, ctx), fields(alert = %alert.name_any(), namespace = ?alert.namespace()))]
pub async fn reconcile_project_alert(
    alert: Arc<ProjectAlert>,
    ctx: Arc<Context>,
) -> Result<Action> {
    if !alert.spec.in_cluster(&ctx.config.cluster_name) {
        debug!(project = %alert.spec.project_name, "Project belongs to another cluster");
        return Ok(Action::await_change());
    }

    let namespace = alert.namespace().ok_or(Error::MissingObjectKey)?;
    let api: Api<ProjectAlert> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, PROJECT_ALERT_FINALIZER_NAME, alert, |event| async {
        match event {
            FinalizerEvent::Apply(alert) => {
                let initialized = alert.status.is_some();
                apply_rule(&api, alert.as_ref(), &alert.spec.rule, initialized, &ctx).await
            }
            FinalizerEvent::Cleanup(alert) => cleanup_rule(alert.as_ref(), &ctx).await,
        }
    })
    .await
    .map_err(map_finalizer_error)
}

#[instrument(skip(notifier, ctx), fields(notifier = %notifier.name_any()))]
pub async fn reconcile_notifier(notifier: Arc<Notifier>, ctx: Arc<Context>) -> Result<Action> {
    if !notifier.spec.in_cluster(&ctx.config.cluster_name) {
        debug!(cluster = %notifier.spec.cluster_name, "Notifier belongs to another cluster");
        return Ok(Action::await_change());
    }

    let namespace = notifier.namespace().ok_or(Error::MissingObjectKey)?;
    let api: Api<Notifier> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, NOTIFIER_FINALIZER_NAME, notifier, |event| async {
        match event {
            FinalizerEvent::Apply(n) => resync_for_notifier(&n, "applied", &ctx).await,
            FinalizerEvent::Cleanup(n) => resync_for_notifier(&n, "removed", &ctx).await,
        }
    })
    .await
    .map_err(map_finalizer_error)
}

async fn resync_for_notifier(notifier: &Notifier, change: &str, ctx: &Context) -> Result<Action> {
    info!(notifier = %notifier.name_any(), change, "Notifier changed, resyncing routing config");
    ctx.syncer.sync().await?;
    Ok(Action::await_change())
}

/// Align the restart history with the rule's current condition.
///
/// A rule edited away from a restart-rate condition loses its history.
fn track_restart_history(tracker: &RestartTracker, key: &str, rule: &RuleSpec, created: bool) {
    match (rule.condition.restart_rate(), created) {
        (Some(_), true) => tracker.on_rule_created(key),
        (Some(_), false) => tracker.on_rule_updated(key),
        (None, _) => tracker.on_rule_removed(key),
    }
}

/// New rules start `active` with a fresh restart history; every apply resyncs config
async fn apply_rule<K>(
    api: &Api<K>,
    resource: &K,
    rule: &RuleSpec,
    initialized: bool,
    ctx: &Context,
) -> Result<Action>
where
    K: Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();

    if !initialized {
        info!(alert = %name, "Initializing alert state");
        let patch = status_patch(AlertState::Active, None);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }
    track_restart_history(&ctx.tracker, &tracking_key(&namespace, &name), rule, !initialized);

    ctx.syncer.sync().await?;
    Ok(Action::await_change())
}

async fn cleanup_rule<K: Resource>(resource: &K, ctx: &Context) -> Result<Action> {
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();
    info!(alert = %name, "Removing alert rule");

    // the condition may have changed since the history was created
    ctx.tracker.on_rule_removed(&tracking_key(&namespace, &name));

    ctx.syncer.sync().await?;
    Ok(Action::await_change())
}
