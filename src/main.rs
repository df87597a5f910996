//! deferred-publish: stateful stream processor that defers publication of
//! records carrying a `publishing.private` policy until their
//! `publishing.until` deadline elapses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use deferred_publish::api::{self, AppState};
use deferred_publish::clock::SystemClock;
use deferred_publish::config::Config;
use deferred_publish::store::{IndexStore, MemoryIndexStore, SqliteIndexStore};
use deferred_publish::Pipeline;
use dotenv::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;
    deferred_publish::metrics::describe();

    let config = Config::from_env();

    info!(addr = %config.http_addr, "deferred-publish engine starting");

    match &config.sqlite_path {
        Some(path) => {
            info!(path, "using durable SQLite-backed indexes");
            let store = SqliteIndexStore::open(path).context("failed to open SQLite store")?;
            serve(store, config, prometheus_handle).await
        }
        None => {
            info!("using in-memory indexes (state is lost on restart)");
            serve(MemoryIndexStore::new(), config, prometheus_handle).await
        }
    }
}

/// Wire a store into a pipeline, stand up the HTTP surface, and drive the
/// wall-clock scan loop. Generic over the storage backend so both the
/// in-memory and SQLite paths share one driver regardless of which concrete
/// store was selected at startup.
async fn serve<S: IndexStore + 'static>(
    store: S,
    config: Config,
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<()> {
    let pipeline = Pipeline::new(store, Arc::new(SystemClock));
    let state = AppState::new(pipeline);

    tokio::spawn(scan_loop(state.clone(), config.scan_interval_ms));

    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/records/:key", post(api::post_record::<S>))
        .route("/lookup/:key", get(api::get_lookup::<S>))
        .route("/output", get(api::output_stream::<S>))
        .route(
            "/metrics",
            get(move || async move { prometheus_handle.render() }),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Background scan task: fire the wall-clock scan on a fixed cadence, as a
/// `tokio::spawn`ed loop around a `tokio::time::interval`.
async fn scan_loop<S: IndexStore + 'static>(state: AppState<S>, interval_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        if let Err(err) = state.scan_and_broadcast() {
            tracing::error!(%err, "scan tick failed");
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deferred_publish=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
