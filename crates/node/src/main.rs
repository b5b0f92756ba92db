//! Shop node entry point.

use std::sync::Arc;

use domain::RandomProgression;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use node::{Config, LogFormat, Node, NodeError};
use outbox::{InMemoryOutboxStore, OutboxStore, PostgresOutboxStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), NodeError> {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| NodeError::Metrics(e.to_string()))?;

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
            let store = PostgresOutboxStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL outbox");
            run(config, Arc::new(store), metrics_handle).await
        }
        None => {
            tracing::info!("using in-memory outbox");
            run(config, Arc::new(InMemoryOutboxStore::new()), metrics_handle).await
        }
    }
}

async fn run<S: OutboxStore + 'static>(
    config: Config,
    outbox: Arc<S>,
    metrics_handle: PrometheusHandle,
) -> Result<(), NodeError> {
    let node = Node::start(config.clone(), outbox, Arc::new(RandomProgression::new())).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = node.spawn_workers(shutdown_rx);
    let app = node::create_app(node.state(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting shop node");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "worker ended abnormally");
        }
    }
    node.stop().await;

    tracing::info!("node shut down gracefully");
    Ok(())
}
