//! Stores the compiled routing document and asks Alertmanager to pick it up.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::alertmanager::{AlertEngine, AlertmanagerConfig};
use crate::tasks::config::ControllerConfig;
use crate::tasks::types::{Error, Result};

/// Where the serialized routing document lives
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    async fn store(&self, document: &str) -> Result<()>;
}

/// Keeps the document under one key of a Kubernetes secret that Alertmanager mounts
pub struct SecretConfigStorage {
    secrets: Api<Secret>,
    namespace: String,
    secret_name: String,
    config_key: String,
}

impl SecretConfigStorage {
    #[must_use]
    pub fn new(client: kube::Client, config: &ControllerConfig) -> Self {
        let settings = &config.alertmanager;
        Self {
            secrets: Api::namespaced(client, &settings.namespace),
            namespace: settings.namespace.clone(),
            secret_name: settings.secret_name.clone(),
            config_key: settings.config_key.clone(),
        }
    }

    fn data(&self, document: &str) -> BTreeMap<String, ByteString> {
        let mut data = BTreeMap::new();
        data.insert(
            self.config_key.clone(),
            ByteString(document.as_bytes().to_vec()),
        );
        data
    }
}

#[async_trait]
impl ConfigStorage for SecretConfigStorage {
    async fn store(&self, document: &str) -> Result<()> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            data: Some(self.data(document)),
            ..Default::default()
        };

        // Create first; on conflict only the config key is merged so other keys survive
        match self.secrets.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                debug!(secret = %self.secret_name, "Created config secret");
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                let patch = serde_json::json!({ "data": self.data(document) });
                self.secrets
                    .patch(&self.secret_name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Error::StorageError(e.to_string()))?;
                debug!(secret = %self.secret_name, "Updated config secret");
            }
            Err(e) => {
                error!(secret = %self.secret_name, error = %e, "Failed to store config");
                return Err(Error::StorageError(e.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl ReloadPolicy {
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            attempts: config.reload.attempts,
            delay: Duration::from_secs(config.reload.delay_seconds),
        }
    }
}

/// Outcome of one background reload cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub attempts: u32,
    pub successes: u32,
    /// Superseded by a newer publish or stopped by shutdown
    pub cancelled: bool,
}

impl ReloadReport {
    #[must_use]
    pub fn abandoned(&self) -> bool {
        !self.cancelled && self.successes == 0
    }
}

/// Writes routing documents and drives the reload cycle that follows each write.
///
/// The mounted secret reaches Alertmanager's filesystem with some delay, so a
/// reload is issued on every attempt of the cycle rather than stopping at the
/// first success. Reload tasks are owned by the shared [`TaskTracker`] and are
/// cancelled by shutdown or by the next publish.
pub struct ConfigPublisher {
    storage: Arc<dyn ConfigStorage>,
    engine: Arc<dyn AlertEngine>,
    policy: ReloadPolicy,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl ConfigPublisher {
    pub fn new(
        storage: Arc<dyn ConfigStorage>,
        engine: Arc<dyn AlertEngine>,
        policy: ReloadPolicy,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            storage,
            engine,
            policy,
            tasks,
            shutdown,
            in_flight: Mutex::new(None),
        }
    }

    /// Store `config` and start a reload cycle.
    ///
    /// A storage failure is returned to the caller. Reload failures are not; they
    /// are visible through the returned handle's [`ReloadReport`].
    pub async fn publish(&self, config: &AlertmanagerConfig) -> Result<JoinHandle<ReloadReport>> {
        let document = config.to_yaml()?;
        self.storage.store(&document).await?;
        info!(
            receivers = config.receivers.len(),
            routes = config.route.routes.len(),
            "Stored Alertmanager configuration"
        );
        Ok(self.spawn_reload())
    }

    fn spawn_reload(&self) -> JoinHandle<ReloadReport> {
        let token = self.shutdown.child_token();
        match self.in_flight.lock() {
            Ok(mut slot) => {
                if let Some(previous) = slot.replace(token.clone()) {
                    previous.cancel();
                }
            }
            Err(e) => warn!(error = %e, "Reload slot poisoned, previous cycle left running"),
        }

        let engine = self.engine.clone();
        let policy = self.policy;
        self.tasks
            .spawn(async move { reload_cycle(engine.as_ref(), policy, &token).await })
    }
}

async fn reload_cycle(
    engine: &dyn AlertEngine,
    policy: ReloadPolicy,
    token: &CancellationToken,
) -> ReloadReport {
    let mut report = ReloadReport::default();

    for attempt in 1..=policy.attempts {
        if attempt > 1 {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(policy.delay) => {}
            }
        }
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        report.attempts = attempt;
        match engine.reload().await {
            Ok(()) => report.successes += 1,
            Err(e) => debug!(attempt, error = %e, "Alertmanager reload failed"),
        }
    }

    if report.abandoned() {
        warn!(
            attempts = report.attempts,
            "Abandoned Alertmanager reload, config applies on its next restart"
        );
    } else if !report.cancelled {
        debug!(
            attempts = report.attempts,
            successes = report.successes,
            "Reload cycle finished"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alertmanager::client::MockAlertEngine;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> ReloadPolicy {
        ReloadPolicy {
            attempts,
            delay: Duration::from_secs(10),
        }
    }

    fn publisher(
        storage: MockConfigStorage,
        engine: MockAlertEngine,
        attempts: u32,
        shutdown: CancellationToken,
    ) -> ConfigPublisher {
        ConfigPublisher::new(
            Arc::new(storage),
            Arc::new(engine),
            policy(attempts),
            TaskTracker::new(),
            shutdown,
        )
    }

    fn storing_ok() -> MockConfigStorage {
        let mut storage = MockConfigStorage::new();
        storage
            .expect_store()
            .withf(|doc| doc.contains("receivers:"))
            .returning(|_| Ok(()));
        storage
    }

    #[tokio::test(start_paused = true)]
    async fn reload_runs_every_attempt_and_tolerates_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut engine = MockAlertEngine::new();
        engine.expect_reload().times(3).returning(move || {
            // engine still restarting on the first attempt
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::EngineProtocol {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        });

        let publisher = publisher(storing_ok(), engine, 3, CancellationToken::new());
        let handle = publisher
            .publish(&AlertmanagerConfig::with_defaults())
            .await
            .unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.successes, 2);
        assert!(!report.abandoned());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_is_abandoned_not_escalated() {
        let mut engine = MockAlertEngine::new();
        engine
            .expect_reload()
            .times(2)
            .returning(|| Err(Error::EngineStatus("down".to_string())));

        let publisher = publisher(storing_ok(), engine, 2, CancellationToken::new());
        let report = publisher
            .publish(&AlertmanagerConfig::with_defaults())
            .await
            .unwrap()
            .await
            .unwrap();
        assert!(report.abandoned());
    }

    #[tokio::test(start_paused = true)]
    async fn storage_failure_is_returned_and_skips_reload() {
        let mut storage = MockConfigStorage::new();
        storage
            .expect_store()
            .returning(|_| Err(Error::StorageError("forbidden".to_string())));
        let mut engine = MockAlertEngine::new();
        engine.expect_reload().never();

        let publisher = publisher(storage, engine, 3, CancellationToken::new());
        let result = publisher.publish(&AlertmanagerConfig::with_defaults()).await;
        assert!(matches!(result, Err(Error::StorageError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_reload_cycle() {
        let mut engine = MockAlertEngine::new();
        engine.expect_reload().times(1).returning(|| Ok(()));

        let shutdown = CancellationToken::new();
        let publisher = publisher(storing_ok(), engine, 10, shutdown.clone());
        let handle = publisher
            .publish(&AlertmanagerConfig::with_defaults())
            .await
            .unwrap();

        // let the first attempt run, then stop during the delay
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        let report = handle.await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_publish_supersedes_running_cycle() {
        let mut engine = MockAlertEngine::new();
        engine.expect_reload().returning(|| Ok(()));

        let publisher = publisher(storing_ok(), engine, 3, CancellationToken::new());
        let config = AlertmanagerConfig::with_defaults();
        let first = publisher.publish(&config).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = publisher.publish(&config).await.unwrap();

        assert!(first.await.unwrap().cancelled);
        let report = second.await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.attempts, 3);
    }
}
