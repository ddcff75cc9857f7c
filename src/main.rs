// Main entry point - Dependency injection, scrape loop and metrics server
mod application;
mod domain;
mod error;
mod infrastructure;
mod presentation;

use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::application::scrape_service::ScrapeService;
use crate::application::ticker::Ticker;
use crate::domain::aqi::AqiCalculator;
use crate::error::Error;
use crate::infrastructure::config::load_scraper_config;
use crate::infrastructure::prometheus_metrics::PrometheusMetrics;
use crate::infrastructure::purple_air_client::PurpleAirClient;
use crate::presentation::app_state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_scraper_config()?;

    // Initialize tracing
    init_tracing(&config.log_level)?;

    // Validate breakpoint tables before anything starts
    let calculator = AqiCalculator::new()?;

    // Create adapters (infrastructure layer)
    let metrics = Arc::new(PrometheusMetrics::new());
    let client = Arc::new(PurpleAirClient::new(
        config.api_url.clone(),
        config.api_token.clone(),
        config.request_timeout,
    )?);

    // Create scrape service (application layer)
    let service = ScrapeService::new(client, metrics.clone(), calculator, config.sensor_ids.clone());
    let ticker = Ticker::new(config.interval, config.shutdown_grace);

    // Bind first; a port conflict is a startup error
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_tx.send_replace(true);
    });

    tracing::info!(
        sensors = ?config.sensor_ids,
        interval = ?config.interval,
        "starting scrape loop"
    );
    let scrape_shutdown = shutdown_rx.clone();
    let scrape_task =
        tokio::spawn(async move { ticker.run(|| service.run_cycle(), scrape_shutdown).await });

    // Build router (presentation layer)
    let router = presentation::router(Arc::new(AppState { metrics }));

    // Start server
    tracing::info!(%addr, "serving metrics");
    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .into_future();

    run_until_stopped(server, shutdown_tx, scrape_task).await?;
    tracing::info!("shut down");

    Ok(())
}

/// Wait for the server to exit, then stop the scrape loop and wait for it.
/// The loop is stopped the same way whether the server drained or failed.
async fn run_until_stopped<S>(
    server: S,
    shutdown: Arc<watch::Sender<bool>>,
    scrape_task: JoinHandle<u64>,
) -> anyhow::Result<()>
where
    S: Future<Output = std::io::Result<()>>,
{
    let served = server.await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "metrics server failed");
    }

    shutdown.send_replace(true);
    let runs = scrape_task.await?;
    tracing::info!(runs, "scrape loop stopped");

    served?;
    Ok(())
}

/// Level from configuration; `RUST_LOG` wins when set.
fn init_tracing(level: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| Error::Config(format!("invalid log level {:?}: {}", level, e)))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "could not listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
