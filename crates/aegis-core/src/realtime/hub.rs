//! Realtime client registry (spec.md §4.10): assigns client ids and enforces
//! a per-source concurrent-connection cap. Message delivery itself lives in
//! [`super::session`] — each connection pulls its own snapshot cadence and
//! subscribes directly to [`crate::alerts::AlertManager`]'s event broadcast,
//! so the hub only tracks bookkeeping needed for the cap and for
//! `/api/health/gateway` connection counts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("source {0} has reached the maximum concurrent realtime connections")]
    SourceCapExceeded(String),
}

pub struct RealtimeHub {
    next_id: AtomicU64,
    max_per_source: usize,
    source_counts: RwLock<HashMap<String, usize>>,
}

impl RealtimeHub {
    pub fn new(max_per_source: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            max_per_source,
            source_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new connection from `source`, returning a fresh client id
    /// or an error if that source is already at its connection cap.
    pub async fn register(&self, source: &str) -> Result<String, HubError> {
        let mut counts = self.source_counts.write().await;
        let count = counts.entry(source.to_string()).or_insert(0);
        if *count >= self.max_per_source {
            return Err(HubError::SourceCapExceeded(source.to_string()));
        }
        *count += 1;
        drop(counts);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(format!("c-{id}"))
    }

    pub async fn unregister(&self, source: &str) {
        let mut counts = self.source_counts.write().await;
        if let Some(count) = counts.get_mut(source) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(source);
            }
        }
    }

    pub async fn total_connections(&self) -> usize {
        self.source_counts.read().await.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_up_to_cap_then_rejects() {
        let hub = RealtimeHub::new(2);
        assert!(hub.register("1.2.3.4").await.is_ok());
        assert!(hub.register("1.2.3.4").await.is_ok());
        assert!(hub.register("1.2.3.4").await.is_err());
    }

    #[tokio::test]
    async fn unregister_frees_a_slot() {
        let hub = RealtimeHub::new(1);
        hub.register("1.2.3.4").await.unwrap();
        assert!(hub.register("1.2.3.4").await.is_err());
        hub.unregister("1.2.3.4").await;
        assert!(hub.register("1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn different_sources_have_independent_caps() {
        let hub = RealtimeHub::new(1);
        hub.register("1.2.3.4").await.unwrap();
        assert!(hub.register("5.6.7.8").await.is_ok());
    }

    #[tokio::test]
    async fn total_connections_reflects_active_registrations() {
        let hub = RealtimeHub::new(5);
        hub.register("1.2.3.4").await.unwrap();
        hub.register("5.6.7.8").await.unwrap();
        assert_eq!(hub.total_connections().await, 2);
    }
}
