//! Alert evaluation loop and lifecycle management (spec.md §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::alerts::notify::Notifier;
use crate::alerts::store::AlertStore;
use crate::metrics::MetricsQuery;
use crate::models::alert::{Alert, AlertHistoryEntry, AlertRule, AlertStatus, HistoryAction};
use crate::tsdb::StoreError;

/// Lifecycle notification broadcast to realtime subscribers (spec.md §4.10).
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub alert_id: String,
    pub rule_id: String,
    pub status: AlertStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct AlertManagerConfig {
    pub check_interval_ms: u64,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self { check_interval_ms: 60_000 }
    }
}

/// In-memory caches over rules and non-resolved alerts, backed by
/// [`AlertStore`] for persistence. Single-threaded evaluation per rule is
/// guaranteed by `evaluate_once` never running concurrently with itself
/// (the background loop is the only caller).
pub struct AlertManager {
    store: Arc<dyn AlertStore>,
    queries: Arc<MetricsQuery>,
    notifier: Notifier,
    config: AlertManagerConfig,
    rules: RwLock<HashMap<String, AlertRule>>,
    alerts: RwLock<HashMap<String, Alert>>,
    active_by_rule: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<AlertEvent>,
}

impl AlertManager {
    pub async fn load(
        store: Arc<dyn AlertStore>,
        queries: Arc<MetricsQuery>,
        notifier: Notifier,
        config: AlertManagerConfig,
    ) -> Result<Self, StoreError> {
        let rules = store.load_rules().await?;
        let alerts = store.load_open_alerts().await?;

        let mut active_by_rule = HashMap::new();
        for alert in &alerts {
            if matches!(alert.status, AlertStatus::Active | AlertStatus::Acknowledged | AlertStatus::Muted) {
                active_by_rule.insert(alert.rule_id.clone(), alert.id.clone());
            }
        }

        let (events, _) = broadcast::channel(256);

        Ok(Self {
            store,
            queries,
            notifier,
            config,
            rules: RwLock::new(rules.into_iter().map(|r| (r.id.clone(), r)).collect()),
            alerts: RwLock::new(alerts.into_iter().map(|a| (a.id.clone(), a)).collect()),
            active_by_rule: RwLock::new(active_by_rule),
            events,
        })
    }

    /// Subscribes to alert lifecycle events for realtime push (spec.md §4.10).
    /// Best-effort: a lagging subscriber misses old events rather than blocking publishers.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    fn publish_event(&self, alert: &Alert) {
        let _ = self.events.send(AlertEvent {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            status: alert.status,
            message: alert.message.clone(),
            timestamp: Utc::now(),
        });
    }

    pub async fn rules_snapshot(&self) -> Vec<AlertRule> {
        self.rules.read().await.values().cloned().collect()
    }

    pub async fn alerts_snapshot(&self) -> Vec<Alert> {
        self.alerts.read().await.values().cloned().collect()
    }

    /// Persists a newly defined rule and adds it to the evaluation set.
    pub async fn create_rule(&self, rule: AlertRule) -> Result<(), StoreError> {
        self.store.save_rule(&rule).await?;
        self.rules.write().await.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Flips a rule's `enabled` flag; disabled rules are skipped by `evaluate_once`.
    pub async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> Result<(), String> {
        let mut rules = self.rules.write().await;
        let rule = rules.get_mut(rule_id).ok_or_else(|| format!("unknown rule: {rule_id}"))?;
        rule.enabled = enabled;
        rule.updated_at = Utc::now();
        let updated = rule.clone();
        drop(rules);
        self.store.save_rule(&updated).await.map_err(|e| e.to_string())
    }

    /// Removes a rule from both the store and the evaluation set. Alerts the
    /// rule already triggered are left untouched — they resolve or get
    /// acknowledged independently of their originating rule's lifetime.
    pub async fn delete_rule(&self, rule_id: &str) -> Result<(), String> {
        self.rules.write().await.remove(rule_id);
        self.store.delete_rule(rule_id).await.map_err(|e| e.to_string())
    }

    /// Human-initiated resolve, for operators who don't want to wait for
    /// `evaluate_once` to auto-resolve once the condition clears.
    pub async fn resolve(&self, alert_id: &str) -> Result<(), String> {
        let now = Utc::now();
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(alert_id).ok_or_else(|| format!("unknown alert: {alert_id}"))?;
        let rule_id = alert.rule_id.clone();
        alert.resolve(now)?;
        let _ = self.store.save_alert(alert).await;
        self.publish_event(alert);
        drop(alerts);
        self.active_by_rule.write().await.remove(&rule_id);
        self.record_history(alert_id, HistoryAction::Resolved, None, Some("resolved by operator".to_string()))
            .await;
        Ok(())
    }

    pub async fn history(&self, alert_id: Option<&str>, limit: i64) -> Result<Vec<AlertHistoryEntry>, StoreError> {
        self.store.load_history(alert_id, limit).await
    }

    /// Runs the periodic evaluator until `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.check_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.evaluate_once().await;
                    self.sweep_muted().await;
                }
                _ = shutdown.recv() => return,
            }
        }
    }

    /// One evaluation pass over every enabled rule.
    pub async fn evaluate_once(&self) {
        let now = Utc::now();
        let rule_ids: Vec<String> = self.rules.read().await.values().filter(|r| r.enabled).map(|r| r.id.clone()).collect();

        for rule_id in rule_ids {
            let rule = match self.rules.read().await.get(&rule_id).cloned() {
                Some(r) => r,
                None => continue,
            };
            if rule.is_in_cooldown(now) {
                continue;
            }

            let value = self
                .queries
                .metric_value(
                    &rule.condition.metric,
                    rule.condition.window_seconds,
                    rule.condition.endpoint.as_deref(),
                    rule.condition.backend.as_deref(),
                    now,
                )
                .await;
            let value = match value {
                Ok(v) => v,
                Err(e) => {
                    warn!("alert rule {} could not resolve metric value: {e}", rule.id);
                    continue;
                }
            };

            let condition_met = rule.condition.operator.evaluate(value, rule.condition.threshold);
            let has_active = self.active_by_rule.read().await.contains_key(&rule.id);

            if condition_met && !has_active {
                self.trigger(&rule, value, now).await;
            } else if !condition_met && has_active {
                self.auto_resolve(&rule.id, now, "condition no longer met").await;
            }
        }
    }

    async fn trigger(&self, rule: &AlertRule, value: f64, now: chrono::DateTime<Utc>) {
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            severity: rule.severity,
            status: AlertStatus::Active,
            message: format!(
                "{} {:?} {} (value={value}, threshold={})",
                rule.condition.metric, rule.condition.operator, rule.name, rule.condition.threshold
            ),
            value,
            threshold: rule.condition.threshold,
            triggered_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            muted_until: None,
            metadata: None,
        };

        if let Err(e) = self.store.save_alert(&alert).await {
            warn!("failed to persist triggered alert for rule {}: {e}", rule.id);
        }
        self.record_history(&alert.id, HistoryAction::Triggered, None, None).await;

        self.alerts.write().await.insert(alert.id.clone(), alert.clone());
        self.active_by_rule.write().await.insert(rule.id.clone(), alert.id.clone());

        self.notifier.dispatch(&alert, rule).await;
        self.publish_event(&alert);

        let mut updated_rule = rule.clone();
        updated_rule.last_triggered_at = Some(now);
        updated_rule.updated_at = now;
        if let Err(e) = self.store.save_rule(&updated_rule).await {
            warn!("failed to persist last_triggered_at for rule {}: {e}", rule.id);
        }
        self.rules.write().await.insert(updated_rule.id.clone(), updated_rule);

        info!("alert triggered: rule={} value={value}", rule.id);
    }

    async fn auto_resolve(&self, rule_id: &str, now: chrono::DateTime<Utc>, note: &str) {
        let alert_id = match self.active_by_rule.write().await.remove(rule_id) {
            Some(id) => id,
            None => return,
        };
        let mut alerts = self.alerts.write().await;
        if let Some(alert) = alerts.get_mut(&alert_id) {
            if alert.resolve(now).is_ok() {
                if let Err(e) = self.store.save_alert(alert).await {
                    warn!("failed to persist auto-resolved alert {alert_id}: {e}");
                }
                self.publish_event(alert);
                drop(alerts);
                self.record_history(&alert_id, HistoryAction::Resolved, None, Some(note.to_string())).await;
                info!("alert auto-resolved: {alert_id} ({note})");
            }
        }
    }

    /// Human-initiated acknowledge, persisted with a history entry.
    pub async fn acknowledge(&self, alert_id: &str, by: String) -> Result<(), String> {
        let now = Utc::now();
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(alert_id).ok_or_else(|| format!("unknown alert: {alert_id}"))?;
        alert.acknowledge(by.clone(), now)?;
        let _ = self.store.save_alert(alert).await;
        self.publish_event(alert);
        drop(alerts);
        self.record_history(alert_id, HistoryAction::Acknowledged, Some(by), None).await;
        Ok(())
    }

    /// Human-initiated mute; the alert stays out of re-triggering
    /// consideration until `sweep_muted` reactivates it.
    pub async fn mute(&self, alert_id: &str, until: chrono::DateTime<Utc>) -> Result<(), String> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts.get_mut(alert_id).ok_or_else(|| format!("unknown alert: {alert_id}"))?;
        alert.mute(until)?;
        let _ = self.store.save_alert(alert).await;
        self.publish_event(alert);
        drop(alerts);
        self.record_history(alert_id, HistoryAction::Muted, None, None).await;
        Ok(())
    }

    /// Reactivates any muted alert whose `muted_until` has elapsed.
    pub async fn sweep_muted(&self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.status == AlertStatus::Muted && a.muted_until.is_some_and(|u| now >= u))
            .map(|a| a.id.clone())
            .collect();

        for alert_id in due {
            let mut alerts = self.alerts.write().await;
            if let Some(alert) = alerts.get_mut(&alert_id) {
                if alert.unmute_if_due(now) {
                    let _ = self.store.save_alert(alert).await;
                    self.publish_event(alert);
                    drop(alerts);
                    self.record_history(&alert_id, HistoryAction::Unmuted, None, None).await;
                }
            }
        }
    }

    async fn record_history(&self, alert_id: &str, action: HistoryAction, user_id: Option<String>, note: Option<String>) {
        let entry = AlertHistoryEntry {
            alert_id: alert_id.to_string(),
            action,
            timestamp: Utc::now(),
            user_id,
            note,
        };
        if let Err(e) = self.store.append_history(&entry).await {
            warn!("failed to persist alert history entry for {alert_id}: {e}");
        }
    }
}
