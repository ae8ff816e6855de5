use crate::tasks::config::ControllerConfig;
use crate::tasks::config_sync::ConfigSyncer;
use crate::tasks::restart::RestartTracker;
use std::sync::Arc;

pub const CLUSTER_ALERT_FINALIZER_NAME: &str = "alerts.platform/cluster-alert-finalizer";
pub const PROJECT_ALERT_FINALIZER_NAME: &str = "alerts.platform/project-alert-finalizer";
pub const NOTIFIER_FINALIZER_NAME: &str = "alerts.platform/notifier-finalizer";

/// Errors surfaced by the alert controller
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Missing object key")]
    MissingObjectKey,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Alertmanager answered with a non-success HTTP status
    #[error("Alertmanager returned {status}: {body}")]
    EngineProtocol { status: u16, body: String },

    /// Alertmanager answered 2xx but its envelope reported failure
    #[error("Alertmanager reported status '{0}'")]
    EngineStatus(String),

    #[error("Config storage error: {0}")]
    StorageError(String),

    #[error("Invalid target '{0}'")]
    InvalidTarget(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every reconciler
pub struct Context {
    pub client: kube::Client,
    pub config: Arc<ControllerConfig>,
    pub syncer: Arc<ConfigSyncer>,
    pub tracker: Arc<RestartTracker>,
}
