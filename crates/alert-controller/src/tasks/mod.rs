use crate::alertmanager::{AlertEngine, AlertmanagerClient};
use crate::crds::{ClusterAlert, Notifier, ProjectAlert};
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn, Instrument};

pub mod compiler;
pub mod config;
pub mod config_sync;
pub mod pod_watcher;
pub mod publisher;
pub mod restart;
pub mod rule;
pub mod state_sync;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use config_sync::{reconcile_cluster_alert, reconcile_notifier, reconcile_project_alert};
pub use state_sync::StateSynchronizer;
pub use types::{Error, Result};

use config_sync::ConfigSyncer;
use pod_watcher::{KubePodSource, PodRestartWatcher};
use publisher::{ConfigPublisher, ReloadPolicy, SecretConfigStorage};
use restart::{InMemoryRestartStore, RestartTracker};
use store::{KubeRuleStore, RuleStore};
use types::Context;

/// Build every component and spawn the controllers and polling loops on `tasks`.
///
/// Everything stops when `shutdown` is cancelled. The returned synchronizer
/// reports readiness.
#[instrument(skip_all, fields(cluster = %config.cluster_name))]
pub async fn run_alert_controller(
    client: Client,
    config: Arc<ControllerConfig>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) -> Result<Arc<StateSynchronizer>> {
    info!("Starting alert controller");

    let engine: Arc<dyn AlertEngine> = Arc::new(AlertmanagerClient::from_config(&config)?);
    let store: Arc<dyn RuleStore> =
        Arc::new(KubeRuleStore::new(client.clone(), config.cluster_name.clone()));

    let publisher = ConfigPublisher::new(
        Arc::new(SecretConfigStorage::new(client.clone(), &config)),
        engine.clone(),
        ReloadPolicy::from_config(&config),
        tasks.clone(),
        shutdown.clone(),
    );
    let syncer = Arc::new(ConfigSyncer::new(store.clone(), publisher));
    let tracker = Arc::new(RestartTracker::new(
        Arc::new(InMemoryRestartStore::new()),
        config.restart.max_samples,
    ));

    let context = Arc::new(Context {
        client: client.clone(),
        config: config.clone(),
        syncer: syncer.clone(),
        tracker: tracker.clone(),
    });

    // Publish once so Alertmanager has a config even before the first rule event
    if let Err(e) = syncer.sync().await {
        warn!(error = %e, "Initial config sync failed, waiting for rule events");
    }

    let cluster_alerts: Api<ClusterAlert> = Api::namespaced(client.clone(), &config.cluster_name);
    let project_alerts: Api<ProjectAlert> = Api::all(client.clone());
    let notifiers: Api<Notifier> = Api::namespaced(client.clone(), &config.cluster_name);

    spawn_until_shutdown(
        &tasks,
        &shutdown,
        Controller::new(cluster_alerts, Config::default().any_semantic())
            .run(reconcile_cluster_alert, error_policy, context.clone())
            .for_each(|result| log_reconcile("ClusterAlert", result))
            .instrument(tracing::info_span!("cluster_alert_controller")),
    );
    spawn_until_shutdown(
        &tasks,
        &shutdown,
        Controller::new(project_alerts, Config::default().any_semantic())
            .run(reconcile_project_alert, error_policy, context.clone())
            .for_each(|result| log_reconcile("ProjectAlert", result))
            .instrument(tracing::info_span!("project_alert_controller")),
    );
    spawn_until_shutdown(
        &tasks,
        &shutdown,
        Controller::new(notifiers, Config::default().any_semantic())
            .run(reconcile_notifier, error_policy, context)
            .for_each(|result| log_reconcile("Notifier", result))
            .instrument(tracing::info_span!("notifier_controller")),
    );

    let state_sync = Arc::new(StateSynchronizer::new(
        store.clone(),
        engine.clone(),
        config.state_interval(),
    ));
    tasks.spawn({
        let state_sync = state_sync.clone();
        let shutdown = shutdown.clone();
        async move { state_sync.run(shutdown).await }
    });

    let pod_watcher = PodRestartWatcher::new(
        store,
        Arc::new(KubePodSource::new(client)),
        engine,
        tracker,
        config.cluster_name.clone(),
        config.pod_watch_interval(),
    );
    tasks.spawn({
        let shutdown = shutdown.clone();
        async move { pod_watcher.run(shutdown).await }
    });

    info!("Alert controller components started");
    Ok(state_sync)
}

/// Run a controller stream on `tasks`, dropping it when shutdown fires
fn spawn_until_shutdown<F>(tasks: &TaskTracker, shutdown: &CancellationToken, controller: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = shutdown.clone();
    tasks.spawn(async move {
        tokio::select! {
            () = controller => warn!("Controller stream ended"),
            () = shutdown.cancelled() => {}
        }
    });
}

async fn log_reconcile<T: Debug, E: std::error::Error>(
    kind: &str,
    result: std::result::Result<T, E>,
) {
    match result {
        Ok(object) => info!(resource = ?object, "{kind} reconciliation successful"),
        Err(err) => error!(error = %err, "{kind} reconciliation error"),
    }
}

/// Requeue after the configured backoff
fn error_policy<K: ResourceExt>(object: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(
        object = %object.name_any(),
        error = %error,
        "Reconcile failed, requeueing"
    );
    Action::requeue(ctx.config.error_requeue())
}
