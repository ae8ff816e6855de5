//! Keeps each rule's recorded lifecycle state consistent with what Alertmanager reports.
//!
//! Alertmanager decides whether an alert is firing. The operator decides whether it
//! should be muted. Each tick reads the live alert list, derives an observed state
//! per rule and applies [`decide`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alertmanager::{AlertEngine, EngineAlert};
use crate::crds::AlertState;
use crate::tasks::rule::{AlertIdentity, AlertRule};
use crate::tasks::store::RuleStore;
use crate::tasks::types::Result;

/// State implied by the engine's live alerts for `identity`
#[must_use]
pub fn observed_state(identity: &AlertIdentity, alerts: &[EngineAlert]) -> AlertState {
    match alerts
        .iter()
        .find(|alert| alert.alert_id() == Some(identity.as_str()))
    {
        None => AlertState::Active,
        Some(alert) if alert.is_suppressed() => AlertState::Muted,
        Some(_) => AlertState::Alerting,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceOp {
    Add,
    Remove,
}

/// What one rule needs this tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncDecision {
    pub silence: Option<SilenceOp>,
    pub persist: Option<AlertState>,
}

impl SyncDecision {
    const NOTHING: Self = Self {
        silence: None,
        persist: None,
    };

    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::NOTHING
    }
}

/// Transition table for `(recorded, observed)`.
///
/// The two silence-only rows repair the engine without overwriting the
/// operator's last choice: a lapsed silence on a muted rule is re-applied and a
/// lingering silence on an unmuted rule is removed.
#[must_use]
pub fn decide(recorded: AlertState, observed: AlertState) -> SyncDecision {
    use AlertState::{Active, Alerting, Inactive, Muted};

    match (recorded, observed) {
        (Inactive, _) => SyncDecision::NOTHING,
        (r, o) if r == o => SyncDecision::NOTHING,
        (Muted, Active) => SyncDecision {
            silence: Some(SilenceOp::Remove),
            persist: Some(Active),
        },
        (Alerting, Muted) => SyncDecision {
            silence: Some(SilenceOp::Remove),
            persist: None,
        },
        (Muted, Alerting) => SyncDecision {
            silence: Some(SilenceOp::Add),
            persist: None,
        },
        (_, o) => SyncDecision {
            silence: None,
            persist: Some(o),
        },
    }
}

/// Counters for one tick, mostly for logs and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub rules: usize,
    pub silences_added: usize,
    pub silences_removed: usize,
    pub persisted: usize,
    pub failures: usize,
}

pub struct StateSynchronizer {
    store: Arc<dyn RuleStore>,
    engine: Arc<dyn AlertEngine>,
    interval: Duration,
    ready: AtomicBool,
}

impl StateSynchronizer {
    pub fn new(
        store: Arc<dyn RuleStore>,
        engine: Arc<dyn AlertEngine>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            interval,
            ready: AtomicBool::new(false),
        }
    }

    /// True once the first tick has finished, successful or not
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Reconcile every rule once.
    ///
    /// Fails without touching any rule when the engine or the store cannot be
    /// read; a partial snapshot is never reconciled.
    pub async fn tick(&self) -> Result<TickSummary> {
        let alerts = self.engine.list_alerts().await?;
        let mut rules = self.store.list_cluster_rules().await?;
        rules.extend(self.store.list_project_rules().await?);

        let mut summary = TickSummary {
            rules: rules.len(),
            ..TickSummary::default()
        };
        for rule in &rules {
            self.reconcile_rule(rule, &alerts, &mut summary).await;
        }
        Ok(summary)
    }

    async fn reconcile_rule(
        &self,
        rule: &AlertRule,
        alerts: &[EngineAlert],
        summary: &mut TickSummary,
    ) {
        let identity = rule.identity();
        let observed = observed_state(&identity, alerts);
        let decision = decide(rule.state, observed);
        if decision.is_noop() {
            return;
        }

        info!(
            alert_id = %identity,
            recorded = %rule.state,
            observed = %observed,
            "Reconciling alert state"
        );

        match decision.silence {
            Some(SilenceOp::Add) => match self.engine.add_silence(&identity).await {
                Ok(()) => summary.silences_added += 1,
                Err(e) => {
                    error!(alert_id = %identity, error = %e, "Failed to add silence");
                    summary.failures += 1;
                    return;
                }
            },
            Some(SilenceOp::Remove) => match self.engine.remove_silence(&identity).await {
                Ok(removed) => summary.silences_removed += removed,
                Err(e) => {
                    error!(alert_id = %identity, error = %e, "Failed to remove silence");
                    summary.failures += 1;
                    // keep the recorded state so the removal is retried next tick
                    return;
                }
            },
            None => {}
        }

        if let Some(state) = decision.persist {
            match self.store.update_rule_status(rule, state).await {
                Ok(()) => summary.persisted += 1,
                Err(e) => {
                    error!(
                        alert_id = %identity,
                        state = %state,
                        error = %e,
                        "Failed to persist alert state"
                    );
                    summary.failures += 1;
                }
            }
        }
    }

    /// Tick on a fixed interval until `shutdown` fires. A tick in progress is
    /// allowed to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Starting state synchronizer");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.tick().await {
                Ok(summary) => debug!(?summary, "State sync tick complete"),
                Err(e) => warn!(error = %e, "Skipping state sync tick"),
            }
            self.ready.store(true, Ordering::Relaxed);
        }
        info!("State synchronizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alertmanager::client::MockAlertEngine;
    use crate::alertmanager::models::EngineAlertStatus;
    use crate::crds::alert::PodTarget;
    use crate::crds::{AlertCondition, RuleSpec, Severity};
    use crate::tasks::rule::RuleScope;
    use crate::tasks::store::MockRuleStore;
    use crate::tasks::types::Error;
    use std::collections::BTreeMap;

    fn rule(state: AlertState) -> AlertRule {
        AlertRule {
            namespace: "p1".to_string(),
            name: "r1".to_string(),
            scope: RuleScope::Project,
            spec: RuleSpec {
                display_name: "r1".to_string(),
                description: String::new(),
                severity: Severity::Warning,
                initial_wait_seconds: 0,
                repeat_interval_seconds: 60,
                condition: AlertCondition::PodNotRunning(PodTarget {
                    pod_id: "default:web".to_string(),
                }),
                recipients: vec![],
            },
            state,
            resource_version: Some("1".to_string()),
        }
    }

    fn live(alert_id: &str, state: &str) -> EngineAlert {
        let mut labels = BTreeMap::new();
        labels.insert("alert_id".to_string(), alert_id.to_string());
        EngineAlert {
            labels,
            status: EngineAlertStatus {
                state: state.to_string(),
            },
        }
    }

    /// Engine alerts that make `p1-r1` look `observed`
    fn alerts_for(observed: AlertState) -> Vec<EngineAlert> {
        match observed {
            AlertState::Active => vec![live("p1-other", "active")],
            AlertState::Alerting => vec![live("p1-r1", "active")],
            AlertState::Muted => vec![live("p1-r1", "suppressed")],
            AlertState::Inactive => unreachable!("never observed"),
        }
    }

    struct Expect {
        add: usize,
        remove: usize,
        persist: Option<AlertState>,
    }

    impl Expect {
        const NOTHING: Self = Self {
            add: 0,
            remove: 0,
            persist: None,
        };
    }

    async fn run_tick(recorded: AlertState, observed: AlertState, expect: Expect) -> TickSummary {
        let mut engine = MockAlertEngine::new();
        let alerts = alerts_for(observed);
        engine
            .expect_list_alerts()
            .returning(move || Ok(alerts.clone()));
        engine
            .expect_add_silence()
            .withf(|id| id.as_str() == "p1-r1")
            .times(expect.add)
            .returning(|_| Ok(()));
        engine
            .expect_remove_silence()
            .withf(|id| id.as_str() == "p1-r1")
            .times(expect.remove)
            .returning(|_| Ok(1));

        let mut store = MockRuleStore::new();
        store.expect_list_cluster_rules().returning(|| Ok(vec![]));
        store
            .expect_list_project_rules()
            .returning(move || Ok(vec![rule(recorded)]));
        match expect.persist {
            Some(state) => {
                store
                    .expect_update_rule_status()
                    .withf(move |r, s| r.name == "r1" && *s == state)
                    .times(1)
                    .returning(|_, _| Ok(()));
            }
            None => {
                store.expect_update_rule_status().never();
            }
        }

        let sync =
            StateSynchronizer::new(Arc::new(store), Arc::new(engine), Duration::from_secs(10));
        sync.tick().await.unwrap()
    }

    #[test]
    fn observed_state_from_live_alerts() {
        let id = AlertIdentity::new("p1", "r1");
        assert_eq!(observed_state(&id, &[]), AlertState::Active);
        assert_eq!(observed_state(&id, &[live("p1-r10", "active")]), AlertState::Active);
        assert_eq!(observed_state(&id, &[live("p1-r1", "active")]), AlertState::Alerting);
        assert_eq!(observed_state(&id, &[live("p1-r1", "suppressed")]), AlertState::Muted);
    }

    #[test]
    fn decide_covers_transition_table() {
        use AlertState::{Active, Alerting, Inactive, Muted};

        for observed in [Active, Alerting, Muted] {
            assert!(decide(Inactive, observed).is_noop());
            assert!(decide(observed, observed).is_noop());
        }
        assert_eq!(
            decide(Muted, Active),
            SyncDecision {
                silence: Some(SilenceOp::Remove),
                persist: Some(Active),
            }
        );
        assert_eq!(
            decide(Alerting, Muted),
            SyncDecision {
                silence: Some(SilenceOp::Remove),
                persist: None,
            }
        );
        assert_eq!(
            decide(Muted, Alerting),
            SyncDecision {
                silence: Some(SilenceOp::Add),
                persist: None,
            }
        );
        for (recorded, observed) in [(Active, Alerting), (Active, Muted), (Alerting, Active)] {
            assert_eq!(
                decide(recorded, observed),
                SyncDecision {
                    silence: None,
                    persist: Some(observed),
                }
            );
        }
    }

    #[tokio::test]
    async fn muted_rule_with_no_alert_is_unmuted() {
        let summary = run_tick(
            AlertState::Muted,
            AlertState::Active,
            Expect {
                add: 0,
                remove: 1,
                persist: Some(AlertState::Active),
            },
        )
        .await;
        assert_eq!(summary.silences_removed, 1);
        assert_eq!(summary.persisted, 1);
    }

    #[tokio::test]
    async fn lingering_silence_on_alerting_rule_is_removed_without_persist() {
        run_tick(
            AlertState::Alerting,
            AlertState::Muted,
            Expect {
                add: 0,
                remove: 1,
                persist: None,
            },
        )
        .await;
    }

    #[tokio::test]
    async fn lapsed_silence_on_muted_rule_is_reapplied_without_persist() {
        let summary = run_tick(
            AlertState::Muted,
            AlertState::Alerting,
            Expect {
                add: 1,
                remove: 0,
                persist: None,
            },
        )
        .await;
        assert_eq!(summary.silences_added, 1);
        assert_eq!(summary.persisted, 0);
    }

    #[tokio::test]
    async fn plain_mismatches_persist_observed_state() {
        for (recorded, observed) in [
            (AlertState::Active, AlertState::Alerting),
            (AlertState::Active, AlertState::Muted),
            (AlertState::Alerting, AlertState::Active),
        ] {
            let expect = Expect {
                add: 0,
                remove: 0,
                persist: Some(observed),
            };
            run_tick(recorded, observed, expect).await;
        }
    }

    #[tokio::test]
    async fn matching_states_do_nothing() {
        for state in [AlertState::Active, AlertState::Alerting, AlertState::Muted] {
            let summary = run_tick(state, state, Expect::NOTHING).await;
            assert_eq!(summary.rules, 1);
        }
    }

    #[tokio::test]
    async fn inactive_rule_is_frozen() {
        for observed in [AlertState::Active, AlertState::Alerting, AlertState::Muted] {
            run_tick(AlertState::Inactive, observed, Expect::NOTHING).await;
        }
    }

    #[tokio::test]
    async fn engine_failure_skips_whole_tick() {
        let mut engine = MockAlertEngine::new();
        engine.expect_list_alerts().returning(|| {
            Err(Error::EngineProtocol {
                status: 502,
                body: String::new(),
            })
        });
        engine.expect_add_silence().never();
        engine.expect_remove_silence().never();
        let mut store = MockRuleStore::new();
        store.expect_list_cluster_rules().never();
        store.expect_list_project_rules().never();
        store.expect_update_rule_status().never();

        let sync =
            StateSynchronizer::new(Arc::new(store), Arc::new(engine), Duration::from_secs(10));
        assert!(sync.tick().await.is_err());
    }

    #[tokio::test]
    async fn failed_silence_removal_defers_persist() {
        let mut engine = MockAlertEngine::new();
        engine.expect_list_alerts().returning(|| Ok(vec![]));
        engine
            .expect_remove_silence()
            .times(1)
            .returning(|_| Err(Error::EngineStatus("error".to_string())));
        let mut store = MockRuleStore::new();
        store.expect_list_cluster_rules().returning(|| Ok(vec![]));
        store
            .expect_list_project_rules()
            .returning(|| Ok(vec![rule(AlertState::Muted)]));
        store.expect_update_rule_status().never();

        let sync =
            StateSynchronizer::new(Arc::new(store), Arc::new(engine), Duration::from_secs(10));
        let summary = sync.tick().await.unwrap();
        assert_eq!(summary.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_marks_ready_and_stops_on_shutdown() {
        let mut engine = MockAlertEngine::new();
        engine.expect_list_alerts().returning(|| Ok(vec![]));
        let mut store = MockRuleStore::new();
        store.expect_list_cluster_rules().returning(|| Ok(vec![]));
        store.expect_list_project_rules().returning(|| Ok(vec![]));

        let sync = Arc::new(StateSynchronizer::new(
            Arc::new(store),
            Arc::new(engine),
            Duration::from_secs(10),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let sync = sync.clone();
            let shutdown = shutdown.clone();
            async move { sync.run(shutdown).await }
        });

        assert!(!sync.is_ready());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sync.is_ready());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
