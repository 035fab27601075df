use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use capture_verify::{
    app_state::AppState,
    config::AppConfig,
    db, routes,
    services::{
        bus::PgNotificationBus, encryption::PayloadCipher, queue::DetectionQueue,
        store::PgWorkItemStore,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    let settings = config
        .verification_settings()
        .expect("Invalid verification settings");

    tracing::info!(
        timeout_ms = settings.timeout_ms,
        min_matches = settings.min_matches,
        max_matches = ?settings.max_matches,
        camera = %settings.capability(),
        "Initializing capture-verify server"
    );

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "capture_verifications_total",
        "Verification attempts by outcome"
    );
    metrics::describe_histogram!(
        "correlation_wait_seconds",
        "Time between subscribing and resolving a correlation"
    );
    metrics::describe_counter!("work_items_dispatched_total", "Work items persisted and triggered");
    metrics::describe_counter!(
        "work_items_dispatch_failed_total",
        "Dispatch failures by stage"
    );

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let cipher = PayloadCipher::new(&config.encryption_key).expect("Failed to initialize encryption");
    let store = PgWorkItemStore::new(db_pool.clone(), Arc::new(cipher));
    let bus = PgNotificationBus::new(db_pool.clone());

    tracing::info!("Connecting to Redis detection queue");
    let queue = DetectionQueue::new(&config.redis_url).expect("Failed to initialize detection queue");

    let state = AppState::new(db_pool, Arc::new(store), Arc::new(bus), queue, settings);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/verify", post(routes::verify::verify_capture))
        .with_state(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
