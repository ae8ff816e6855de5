//! Compiles alert rules and notifiers into an Alertmanager routing document.
//!
//! Compilation never fails. A recipient binding that points at an unknown notifier
//! is logged and dropped so one bad binding cannot take down other rules.

use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::alertmanager::config::{
    format_duration, AlertmanagerConfig, EmailReceiverConfig, PagerdutyReceiverConfig, Receiver,
    Route, SlackReceiverConfig, WebhookReceiverConfig,
};
use crate::crds::notifier::ChannelConfig;
use crate::crds::Recipient;
use crate::tasks::rule::{AlertRule, NotifierChannel, ALERT_ID_LABEL};

const TITLE_TEMPLATE: &str = "{{ (index .Alerts 0).Labels.title }}";
const TEXT_TEMPLATE: &str = "{{ (index .Alerts 0).Labels.text }}";
const SLACK_COLOR_TEMPLATE: &str = r#"{{ if eq (index .Alerts 0).Labels.severity "critical" }}danger{{ else if eq (index .Alerts 0).Labels.severity "warning" }}warning{{ else }}good{{ end }}"#;
const EMAIL_SUBJECT_TEMPLATE: &str = "Alert: {{ (index .Alerts 0).Labels.title }}";

/// Build the full routing document for `rules`.
///
/// Inactive rules are skipped. Every other rule yields exactly one receiver and one
/// child route, both keyed by its alert identity. Output order follows identity so
/// the same input always serializes the same way. When two rules map to the same
/// identity the one with the smaller namespace wins.
#[must_use]
pub fn compile(rules: &[AlertRule], notifiers: &[NotifierChannel]) -> AlertmanagerConfig {
    let channels: HashMap<&str, &ChannelConfig> = notifiers
        .iter()
        .map(|n| (n.id.as_str(), &n.config))
        .collect();

    let mut active: Vec<&AlertRule> = rules.iter().filter(|r| !r.is_inactive()).collect();
    active.sort_by(|a, b| {
        (a.identity(), &a.namespace, &a.name).cmp(&(b.identity(), &b.namespace, &b.name))
    });
    // `a-b/c` and `a/b-c` share an identity; only the first keeps a route
    active.dedup_by(|dropped, kept| {
        let collides = dropped.identity() == kept.identity();
        if collides {
            warn!(
                alert_id = %kept.identity(),
                kept = %format!("{}/{}", kept.namespace, kept.name),
                dropped = %format!("{}/{}", dropped.namespace, dropped.name),
                "Skipping rule whose alert identity collides with another rule"
            );
        }
        collides
    });

    let mut config = AlertmanagerConfig::with_defaults();
    for rule in active {
        config.receivers.push(build_receiver(rule, &channels));
        config.route.routes.push(build_route(rule));
    }
    config
}

fn build_route(rule: &AlertRule) -> Route {
    let identity = rule.identity().to_string();
    let mut matchers = BTreeMap::new();
    matchers.insert(ALERT_ID_LABEL.to_string(), identity.clone());

    Route {
        receiver: identity,
        r#match: matchers,
        group_wait: Some(format_duration(rule.spec.initial_wait_seconds)),
        group_interval: None,
        repeat_interval: Some(format_duration(rule.spec.repeat_interval_seconds)),
        routes: Vec::new(),
    }
}

fn build_receiver(rule: &AlertRule, channels: &HashMap<&str, &ChannelConfig>) -> Receiver {
    let identity = rule.identity();
    let mut receiver = Receiver::named(identity.as_str());

    for recipient in &rule.spec.recipients {
        let Some(channel) = channels.get(recipient.notifier_id.as_str()) else {
            warn!(
                alert_id = %identity,
                notifier_id = %recipient.notifier_id,
                "Skipping recipient bound to unknown notifier"
            );
            continue;
        };
        render_channel(&mut receiver, channel, recipient);
    }

    receiver
}

/// Append one channel config for `recipient`, preferring its override destination
fn render_channel(receiver: &mut Receiver, channel: &ChannelConfig, recipient: &Recipient) {
    let destination = |default: &str| {
        recipient
            .recipient
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(default)
            .to_string()
    };

    match channel {
        ChannelConfig::Slack(slack) => receiver.slack_configs.push(SlackReceiverConfig {
            api_url: slack.url.clone(),
            channel: destination(&slack.default_recipient),
            title: TITLE_TEMPLATE.to_string(),
            text: TEXT_TEMPLATE.to_string(),
            color: SLACK_COLOR_TEMPLATE.to_string(),
        }),
        ChannelConfig::Smtp(smtp) => {
            let mut headers = BTreeMap::new();
            headers.insert("Subject".to_string(), EMAIL_SUBJECT_TEMPLATE.to_string());
            receiver.email_configs.push(EmailReceiverConfig {
                to: destination(&smtp.default_recipient),
                from: smtp.sender.clone(),
                smarthost: format!("{}:{}", smtp.host, smtp.port),
                auth_username: smtp.username.clone(),
                auth_password: smtp.password.clone(),
                require_tls: smtp.tls,
                headers,
            });
        }
        ChannelConfig::Pagerduty(pagerduty) => {
            receiver.pagerduty_configs.push(PagerdutyReceiverConfig {
                service_key: destination(&pagerduty.service_key),
                description: TITLE_TEMPLATE.to_string(),
            });
        }
        ChannelConfig::Webhook(webhook) => {
            receiver.webhook_configs.push(WebhookReceiverConfig {
                url: destination(&webhook.url),
            });
        }
    }
}
