//! Alert evaluation loop, lifecycle management and notification dispatch
//! (spec.md §4.9).

pub mod manager;
pub mod notify;
pub mod store;

pub use manager::{AlertEvent, AlertManager, AlertManagerConfig};
pub use notify::Notifier;
pub use store::AlertStore;
