//! Per-connection realtime session loop (spec.md §4.10), grounded in the
//! teacher's `services::websocket::WebSocketHandler` upgrade-then-spawn
//! idiom, generalized from backend proxying to subscription push: each
//! session owns its own snapshot cadence, listens for alert lifecycle
//! events, and terminates itself after one missed keep-alive cycle.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{rt as actix_rt, web, Error as ActixError, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::alerts::AlertManager;
use crate::metrics::MetricsQuery;
use crate::models::metrics::{MetricRange, RangePreset};
use crate::realtime::hub::RealtimeHub;
use crate::realtime::protocol::{ClientFrame, Envelope, SubscribeData, SubscriptionKind};

const DEFAULT_INTERVAL_MS: u64 = 5_000;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Upgrades an HTTP request to a WebSocket connection and drives the
/// subscription loop for its lifetime.
pub async fn handle_connection(
    req: HttpRequest,
    stream: web::Payload,
    hub: Arc<RealtimeHub>,
    queries: Arc<MetricsQuery>,
    alerts: Arc<AlertManager>,
) -> Result<HttpResponse, ActixError> {
    let source = req
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let client_id = match hub.register(&source).await {
        Ok(id) => id,
        Err(e) => {
            warn!("rejecting realtime connection: {e}");
            return Ok(HttpResponse::TooManyRequests().body(e.to_string()));
        }
    };

    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;
    let alert_rx = alerts.subscribe_events();

    let mut connected_session = session.clone();
    let connected = serde_json::to_string(&Envelope::connected(&client_id)).unwrap_or_default();
    let _ = connected_session.text(connected).await;

    actix_rt::spawn(run_session(client_id, source, hub, queries, session, msg_stream, alert_rx));

    Ok(response)
}

async fn run_session(
    client_id: String,
    source: String,
    hub: Arc<RealtimeHub>,
    queries: Arc<MetricsQuery>,
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
    mut alert_rx: broadcast::Receiver<crate::alerts::AlertEvent>,
) {
    let mut subscription = Some(SubscriptionKind::Overview);
    let mut snapshot_interval = tokio::time::interval(Duration::from_millis(DEFAULT_INTERVAL_MS));
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if awaiting_pong {
                    debug!("realtime client {client_id} missed a keep-alive cycle, closing");
                    let _ = session.close(None).await;
                    break;
                }
                awaiting_pong = true;
                if session.ping(b"").await.is_err() {
                    break;
                }
            }
            _ = snapshot_interval.tick() => {
                if let Some(kind) = subscription {
                    let payload = build_snapshot(&queries, kind).await;
                    if send_envelope(&mut session, Envelope::metrics(payload)).await.is_err() {
                        break;
                    }
                }
            }
            event = alert_rx.recv() => {
                match event {
                    Ok(event) => {
                        let payload = serde_json::to_value(&event).unwrap_or(Value::Null);
                        if send_envelope(&mut session, Envelope::alert(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }
            msg = msg_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        awaiting_pong = false;
                        if let Some(new_interval) = handle_client_frame(&text, &mut subscription).await {
                            snapshot_interval = tokio::time::interval(Duration::from_millis(new_interval));
                            if let Some(kind) = subscription {
                                let payload = build_snapshot(&queries, kind).await;
                                let _ = send_envelope(&mut session, Envelope::metrics(payload)).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(bytes))) => {
                        awaiting_pong = false;
                        let _ = session.pong(&bytes).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("realtime client {client_id} stream error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    hub.unregister(&source).await;
    debug!("realtime client {client_id} disconnected");
}

async fn send_envelope(session: &mut actix_ws::Session, envelope: Envelope) -> Result<(), ()> {
    let text = serde_json::to_string(&envelope).unwrap_or_default();
    session.text(text).await.map_err(|_| ())
}

/// Parses one inbound frame, updating `subscription` in place. Returns the
/// new interval in milliseconds if the frame was a `subscribe` that should
/// trigger an immediate snapshot push.
async fn handle_client_frame(text: &str, subscription: &mut Option<SubscriptionKind>) -> Option<u64> {
    let frame: ClientFrame = serde_json::from_str(text).ok()?;
    match frame.kind.as_str() {
        "subscribe" => {
            let data: SubscribeData = serde_json::from_value(frame.data).ok()?;
            *subscription = Some(data.kind);
            Some(data.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS))
        }
        "unsubscribe" => {
            *subscription = None;
            None
        }
        _ => None,
    }
}

async fn build_snapshot(queries: &MetricsQuery, kind: SubscriptionKind) -> Value {
    let range = MetricRange::Preset(RangePreset::FiveMinutes);
    match kind {
        SubscriptionKind::Overview | SubscriptionKind::All => {
            json!(queries.overview(&range).await)
        }
        SubscriptionKind::Requests => {
            json!(queries.request_rate(&range).await)
        }
        SubscriptionKind::RateLimits => {
            json!({ "errorRate": queries.error_rate(&range).await })
        }
        SubscriptionKind::Backends => {
            json!(queries.top_endpoints(&range, 20).await)
        }
    }
}
