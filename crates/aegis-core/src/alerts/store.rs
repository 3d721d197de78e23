//! Persistence contract for alert rules, instances and history, generalized
//! from [`crate::tsdb::TimeSeriesStore`] so the [`super::manager::AlertManager`]
//! can be tested against an in-memory fake.

use async_trait::async_trait;

use crate::models::alert::{Alert, AlertHistoryEntry, AlertRule};
use crate::tsdb::StoreError;

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<AlertRule>, StoreError>;
    /// Open, acknowledged and muted alerts; resolved alerts are not cached
    /// (spec.md §4.9: "load all rules and open/acknowledged/muted alerts").
    async fn load_open_alerts(&self) -> Result<Vec<Alert>, StoreError>;
    async fn save_rule(&self, rule: &AlertRule) -> Result<(), StoreError>;
    async fn delete_rule(&self, rule_id: &str) -> Result<(), StoreError>;
    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    async fn append_history(&self, entry: &AlertHistoryEntry) -> Result<(), StoreError>;
    async fn load_history(&self, alert_id: Option<&str>, limit: i64) -> Result<Vec<AlertHistoryEntry>, StoreError>;
}
