pub mod alert;
pub mod notifier;

pub use alert::{
    AlertCondition, AlertState, AlertStatus, ClusterAlert, ClusterAlertSpec, ProjectAlert,
    ProjectAlertSpec, Recipient, RuleSpec, Severity,
};
pub use notifier::{ChannelConfig, Notifier, NotifierSpec};
