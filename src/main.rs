use status_page::{
    aggregator::LogAggregator,
    api::{build_router, AppState, ServiceInfo},
    config::Config,
    logging::{open_writers, BrokerSink, Formatter, LogSink, Logger, RequestLogger},
    messaging::{self, init_messaging_metrics, Binder},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    config.validate()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "status_page=info,tower_http=info".into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "Starting status page logger v{}",
        env!("CARGO_PKG_VERSION")
    );

    if config.observability.prometheus_enabled {
        init_messaging_metrics();
    }

    // Writers open before the broker connect so a bad writer config fails fast
    let app_writers = open_writers(
        &config.aggregator.app_writers,
        &config.aggregator.app_writer_defaults(),
    )?;
    let request_writers = open_writers(
        &config.aggregator.request_writers,
        &config.aggregator.request_writer_defaults(),
    )?;
    let store = app_writers
        .stores
        .first()
        .or_else(|| request_writers.stores.first())
        .cloned();
    let app_fan_out: Arc<dyn LogSink> = Arc::new(app_writers.fan_out);
    let request_fan_out: Arc<dyn LogSink> = Arc::new(request_writers.fan_out);

    // A connect timeout at startup is fatal
    let connection = messaging::connect(&config.messaging).await?;
    let binder = Binder::new(connection.clone());

    let formatter = Formatter::new(config.service.name.clone());
    let aggregator = LogAggregator::new(
        binder.clone(),
        config.aggregator.queue_names(&config.messaging.exchange),
        Logger::new(formatter.clone(), config.aggregator.level, app_fan_out.clone()),
        RequestLogger::new(formatter.clone(), request_fan_out.clone()),
    );
    aggregator.start().await?;

    // Our own records either loop through the exchange like any producer's
    // or go straight to the local writers
    let (own_app_sink, own_request_sink): (Arc<dyn LogSink>, Arc<dyn LogSink>) =
        if config.logging.publish {
            let sink: Arc<dyn LogSink> =
                Arc::new(BrokerSink::new(binder, config.messaging.exchange.clone()));
            (sink.clone(), sink)
        } else {
            (app_fan_out, request_fan_out)
        };
    let logger = Logger::new(formatter.clone(), config.logging.level, own_app_sink);

    let mut state = AppState::new(ServiceInfo::from_config(&config))
        .with_connection(connection.clone())
        .with_request_logger(RequestLogger::new(formatter, own_request_sink))
        .with_metrics(config.observability.prometheus_enabled);
    if let Some(store) = store {
        state = state.with_store(Arc::new(store));
    }

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    logger.info(format!("Logger service listening on http://{}", addr));
    tracing::info!("   Health check: http://{}/health-check", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    logger.info("Logger service shutting down");
    if let Err(e) = connection.disconnect().await {
        tracing::warn!(error = %e, "Broker disconnect failed");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
