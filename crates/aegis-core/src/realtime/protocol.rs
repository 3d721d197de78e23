//! Wire framing for the realtime subscription endpoint (spec.md §4.10): a
//! flat envelope of `{type, data, timestamp}` in both directions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    Overview,
    Requests,
    RateLimits,
    Backends,
    All,
}

/// Outbound frame. Constructors keep the `type`/`data`/`timestamp` shape
/// consistent so callers never build one by hand.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn connected(client_id: &str) -> Self {
        Self {
            kind: "connected",
            data: serde_json::json!({ "clientId": client_id }),
            timestamp: Utc::now(),
        }
    }

    pub fn metrics(data: Value) -> Self {
        Self { kind: "metrics", data, timestamp: Utc::now() }
    }

    pub fn alert(data: Value) -> Self {
        Self { kind: "alert", data, timestamp: Utc::now() }
    }

    pub fn error(message: &str) -> Self {
        Self {
            kind: "error",
            data: serde_json::json!({ "message": message }),
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self { kind: "pong", data: Value::Null, timestamp: Utc::now() }
    }
}

/// Inbound frame. Only `type` and the `subscribe` fields are interpreted;
/// unknown types are ignored rather than closing the connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeData {
    pub kind: SubscriptionKind,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}
