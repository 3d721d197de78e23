//! AEGIS API gateway server.
//!
//! Thin binary: load settings, wire every data-plane component built in
//! `aegis-core`, start the HTTP server, shut down gracefully.

use std::sync::Arc;

use actix_web::middleware::{Compress, Logger};
use actix_web::{web, App, HttpServer};
use aegis_core::alerts::{AlertManager, AlertManagerConfig, Notifier};
use aegis_core::breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use aegis_core::config::GatewaySettings;
use aegis_core::health::{HealthChecker, HealthCheckerConfig, ReqwestProbe};
use aegis_core::kv::RedisKvStore;
use aegis_core::logs::configure_logger;
use aegis_core::metrics::{CollectorConfig, MetricsCollector, MetricsQuery};
use aegis_core::ml::{MlAggregator, MlClient, MlClientConfig};
use aegis_core::proxy::ProxyPipeline;
use aegis_core::ratelimit::rules::{BypassConfig, KeyStrategy};
use aegis_core::ratelimit::{RateLimiter, TierResolver};
use aegis_core::realtime::{configure_realtime, RealtimeHub};
use aegis_core::router::Router;
use aegis_core::routes::alerts::configure_alerts;
use aegis_core::routes::health::configure_health;
use aegis_core::routes::metrics::configure_metrics;
use aegis_core::tsdb::PostgresStore;
use log::{error, info, warn};
use tokio::signal;

const REALTIME_MAX_SUBSCRIBERS_PER_SOURCE: usize = 4;
const ML_ANOMALY_THRESHOLD: f64 = 0.8;
const ML_FLUSH_INTERVAL_SECS: u64 = 60;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = GatewaySettings::from_env();
    let validation = settings.validate();
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    for recommendation in &validation.recommendations {
        info!("{recommendation}");
    }
    if !validation.is_valid {
        for err in &validation.errors {
            error!("{err}");
        }
        std::process::exit(1);
    }

    info!("starting AEGIS gateway on port {}", settings.port);

    let kv = RedisKvStore::connect(&settings.kv_url)
        .await
        .expect("failed to connect to the rate limiter's KV store");

    let timeseries = PostgresStore::connect(&settings.timeseries_url)
        .await
        .expect("failed to connect to the time-series store");
    timeseries.migrate().await.expect("failed to run time-series store migrations");
    let timeseries = Arc::new(timeseries);

    let router = Router::new(settings.backends.clone()).expect("invalid backend configuration");

    let limiter = RateLimiter::new(
        Arc::new(kv),
        settings.rate_limit_rules.clone(),
        BypassConfig::default(),
        TierResolver::default(),
        KeyStrategy::default(),
    );

    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default()));

    let health = Arc::new(HealthChecker::new(
        settings.backends.clone(),
        Box::new(ReqwestProbe::new()),
        HealthCheckerConfig::default(),
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let collector = MetricsCollector::spawn(
        timeseries.clone(),
        CollectorConfig {
            flush_interval_ms: settings.flush_interval_ms,
            batch_size: settings.batch_size,
            sample_rate: settings.sample_rate,
        },
        shutdown_tx.subscribe(),
    );

    let queries = Arc::new(MetricsQuery::new(timeseries.clone(), collector.clone()));

    let alerts = Arc::new(
        AlertManager::load(
            timeseries.clone(),
            queries.clone(),
            Notifier::new(std::time::Duration::from_secs(5)),
            AlertManagerConfig {
                check_interval_ms: settings.alert_check_interval_ms,
            },
        )
        .await
        .expect("failed to load alert rules and open alerts"),
    );

    let realtime_hub = Arc::new(RealtimeHub::new(REALTIME_MAX_SUBSCRIBERS_PER_SOURCE));

    let mut pipeline = ProxyPipeline::new(router, limiter, breakers.clone(), health.clone(), collector.clone());
    if settings.ml_service_enabled {
        let ml_client = Arc::new(MlClient::new(
            settings.ml_service_url.clone(),
            MlClientConfig {
                base_url_set: true,
                ..MlClientConfig::default()
            },
        ));
        let ml_aggregator = Arc::new(MlAggregator::new(ml_client.clone(), ML_ANOMALY_THRESHOLD));
        pipeline = pipeline.with_ml(ml_aggregator.clone());

        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(ML_FLUSH_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ml_client.refresh_availability().await;
                        let current_minute = chrono::Utc::now().timestamp() / 60;
                        ml_aggregator
                            .flush(current_minute, |endpoint, result| {
                                warn!("ml service reports anomaly on {endpoint}: score {:.2}", result.score);
                            })
                            .await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }
    let pipeline = Arc::new(pipeline);

    {
        let health = health.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            health.run(shutdown).await;
        });
    }
    {
        let alerts = alerts.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            alerts.run(shutdown).await;
        });
    }

    let realtime_path = settings.realtime_path.clone();
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = settings.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(collector.clone()))
            .app_data(web::Data::new(breakers.clone()))
            .app_data(web::Data::new(health.clone()))
            .app_data(web::Data::new(queries.clone()))
            .app_data(web::Data::new(alerts.clone()))
            .wrap(Logger::new(r#"%a "%r" %s %b %T"#))
            .wrap(Compress::default())
            .configure(configure_health)
            .configure(configure_metrics)
            .configure(configure_alerts)
            .configure(|cfg| configure_realtime(cfg, &realtime_path, realtime_hub.clone(), queries.clone(), alerts.clone()))
            .default_service(web::route().to({
                let pipeline = pipeline.clone();
                move |req, body| {
                    let pipeline = pipeline.clone();
                    async move { pipeline.handle(req, body).await }
                }
            }))
    })
    .bind((host.as_str(), port))?
    .run();

    info!("AEGIS gateway listening on {host}:{port}");

    tokio::select! {
        result = server => {
            match result {
                Ok(()) => info!("server stopped gracefully"),
                Err(e) => error!("server error: {e}"),
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping background tasks");
            let _ = shutdown_tx.send(());
        }
    }

    Ok(())
}
