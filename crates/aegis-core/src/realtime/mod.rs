//! Realtime metric/alert subscription push (spec.md §4.10).

pub mod hub;
pub mod protocol;
pub mod session;

use std::sync::Arc;

use actix_web::{web, Error as ActixError, HttpRequest, HttpResponse};

pub use hub::{HubError, RealtimeHub};
pub use protocol::{ClientFrame, Envelope, SubscriptionKind};

use crate::alerts::AlertManager;
use crate::metrics::MetricsQuery;

/// Mounts the realtime subscription endpoint at the configured path.
pub fn configure_realtime(
    cfg: &mut web::ServiceConfig,
    path: &str,
    hub: Arc<RealtimeHub>,
    queries: Arc<MetricsQuery>,
    alerts: Arc<AlertManager>,
) {
    cfg.app_data(web::Data::new(hub))
        .app_data(web::Data::new(queries))
        .app_data(web::Data::new(alerts))
        .route(path, web::get().to(realtime_handler));
}

async fn realtime_handler(
    req: HttpRequest,
    stream: web::Payload,
    hub: web::Data<Arc<RealtimeHub>>,
    queries: web::Data<Arc<MetricsQuery>>,
    alerts: web::Data<Arc<AlertManager>>,
) -> Result<HttpResponse, ActixError> {
    session::handle_connection(req, stream, hub.get_ref().clone(), queries.get_ref().clone(), alerts.get_ref().clone()).await
}
