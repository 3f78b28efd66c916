//! API server entry point.

use std::sync::Arc;

use api::{AppState, CheckoutStore, Config};
use messaging::{Broker, InMemoryBroker, PostgresBroker, Topology, WorkerPool};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryStore, PostgresStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Serves HTTP until a shutdown signal, then drains the worker pools.
async fn serve<S: CheckoutStore>(
    config: Config,
    store: S,
    broker: Arc<dyn Broker>,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let state: Arc<AppState<S>> = api::build_state(store, Arc::clone(&broker), &config)?;
    let workers = api::start_workers(&state, broker, &config).await?;

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    futures_util::future::join_all(workers.into_iter().map(WorkerPool::shutdown)).await;
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the backends and run
    let topology =
        Topology::checkout_with_retry_delay(config.cancel_grace_period, config.ingest_retry_delay);
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .connect(&url)
                .await?;
            let store = PostgresStore::new(pool.clone());
            store.run_migrations().await?;
            let broker = PostgresBroker::new(pool, topology)
                .with_poll_interval(config.broker_poll_interval);

            tracing::info!("using PostgreSQL store and broker");
            serve(config, store, Arc::new(broker), metrics_handle).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store and broker");
            let broker = InMemoryBroker::new(topology);
            serve(config, InMemoryStore::new(), Arc::new(broker), metrics_handle).await
        }
    }
}
