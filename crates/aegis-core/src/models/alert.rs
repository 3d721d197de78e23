//! Alert rule, instance and history types.
//!
//! Lifecycle invariants (spec.md §3.6): an alert is in at most one active
//! state per rule; `Resolved` is terminal; a `Muted` alert auto-reverts to
//! `Active` at `muted_until`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl Operator {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Gte => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Lte => value <= threshold,
            Operator::Eq => (value - threshold).abs() < f64::EPSILON,
            Operator::Neq => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

/// The metric condition an [`AlertRule`] watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCondition {
    /// Metric identifier understood by the collector's value resolver, e.g.
    /// `p95_latency`, `error_rate`, `request_rate`.
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
    /// Window, in seconds, over which the metric value is computed.
    pub window_seconds: u64,
    pub endpoint: Option<String>,
    pub backend: Option<String>,
}

/// Notification action a triggered alert dispatches to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertAction {
    Log,
    Webhook { url: String },
    Chat { webhook_url: String },
    Email { to: String },
    Pager { routing_key: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub severity: Severity,
    pub condition: AlertCondition,
    pub actions: Vec<AlertAction>,
    pub cooldown_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl AlertRule {
    /// Default cooldown (5 minutes) when the rule does not set one.
    pub fn effective_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_seconds.unwrap_or(300) as i64)
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_triggered_at {
            Some(last) => now - last < self.effective_cooldown(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Muted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub muted_until: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl Alert {
    pub fn is_terminal(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    /// Transitions the alert to `Resolved`. Returns an error if the alert is
    /// already resolved — `Resolved` is terminal and never re-enters `Active`.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!("alert {} is already resolved", self.id));
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        Ok(())
    }

    pub fn acknowledge(&mut self, by: String, now: DateTime<Utc>) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!("alert {} is already resolved", self.id));
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(by);
        Ok(())
    }

    pub fn mute(&mut self, until: DateTime<Utc>) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!("alert {} is already resolved", self.id));
        }
        self.status = AlertStatus::Muted;
        self.muted_until = Some(until);
        Ok(())
    }

    /// Auto-reverts a muted alert to `Active` once `muted_until` elapses.
    pub fn unmute_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == AlertStatus::Muted {
            if let Some(until) = self.muted_until {
                if now >= until {
                    self.status = AlertStatus::Active;
                    self.muted_until = None;
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Triggered,
    Acknowledged,
    Resolved,
    Muted,
    Unmuted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub alert_id: String,
    pub action: HistoryAction,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> Alert {
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

    #[test]
    fn resolved_is_terminal() {
        let mut alert = sample_alert();
        alert.resolve(Utc::now()).unwrap();
        assert!(alert.is_terminal());
        assert!(alert.acknowledge("op1".into(), Utc::now()).is_err());
        assert!(alert.mute(Utc::now()).is_err());
    }

    #[test]
    fn mute_then_auto_revert() {
        let mut alert = sample_alert();
        let now = Utc::now();
        alert.mute(now + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(alert.status, AlertStatus::Muted);
        assert!(!alert.unmute_if_due(now));
        assert!(alert.unmute_if_due(now + chrono::Duration::seconds(2)));
        assert_eq!(alert.status, AlertStatus::Active);
    }

    #[test]
    fn cooldown_gate() {
        let mut rule = AlertRule {
            id: "r1".into(),
            name: "test".into(),
            enabled: true,
            severity: Severity::Info,
            condition: AlertCondition {
                metric: "error_rate".into(),
                operator: Operator::Gt,
                threshold: 0.05,
                window_seconds: 300,
                endpoint: None,
                backend: None,
            },
            actions: vec![AlertAction::Log],
            cooldown_seconds: Some(60),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_triggered_at: None,
        };
        let now = Utc::now();
        assert!(!rule.is_in_cooldown(now));
        rule.last_triggered_at = Some(now);
        assert!(rule.is_in_cooldown(now + chrono::Duration::seconds(30)));
        assert!(!rule.is_in_cooldown(now + chrono::Duration::seconds(61)));
    }
}
