//! FX Rate Stream Binary
//!
//! Starts the reference rate streaming service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin fx-rate-stream
//! ```
//!
//! # Environment Variables
//!
//! - `FX_STREAM_PORT`: WebSocket stream port (default: 8000)
//! - `FX_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `FX_TICK_INTERVAL_SECS`: Seconds between broadcast cycles (default: 5)
//! - `FX_TICK_VOLATILITY_BPS`: Maximum move per tick in basis points (default: 50)
//! - `FX_RATE_PRECISION`: Decimal places on simulated rates (default: 6)
//! - `FX_SESSION_QUEUE_CAPACITY`: Outbound frames buffered per client (default: 256)
//! - `FX_CATALOG_PATH`: Instrument catalog JSON (default: bundled catalog)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: fx-rate-stream)
//! - `RUST_LOG` / `LOG_LEVEL`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fx_rate_stream::infrastructure::telemetry;
use fx_rate_stream::{
    BroadcastEngine, BroadcastEngineConfig, ConnectionRouter, DeliveryPort, HealthServer,
    HealthServerState, InstrumentCatalog, RateBoard, ServiceConfig, SessionHandler,
    SimulatedRateSource, StreamServer, StreamState, SubscriptionRegistry, init_metrics,
};
use tokio::signal;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for sessions to close.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting FX Rate Stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let catalog = Arc::new(load_catalog(&config)?);
    tracing::info!(
        instruments = catalog.len(),
        base = catalog.base(),
        "Instrument catalog loaded"
    );

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&catalog)));
    let board = Arc::new(RateBoard::seeded(&catalog));
    let router = Arc::new(ConnectionRouter::new());

    // Broadcast engine
    let engine = Arc::new(BroadcastEngine::new(
        BroadcastEngineConfig {
            interval: config.tick.interval,
        },
        Arc::clone(&registry),
        Arc::clone(&board),
        Arc::new(SimulatedRateSource::new(
            config.tick.volatility_bps,
            config.tick.precision,
        )),
        Arc::clone(&router) as Arc<dyn DeliveryPort>,
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.tick.interval,
        Arc::clone(&registry),
        engine.stats(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    // Stream server
    let stream_state = Arc::new(StreamState::new(
        SessionHandler::new(Arc::clone(&registry), board),
        router,
        config.session.queue_capacity,
        shutdown_token.clone(),
    ));
    let stream_server = StreamServer::new(
        config.server.stream_port,
        stream_state,
        shutdown_token.clone(),
    );

    let engine_task = tokio::spawn({
        let engine = Arc::clone(&engine);
        let cancel = shutdown_token.clone();
        async move { engine.run(cancel).await }
    });
    let mut health_task = tokio::spawn(health_server.run());
    let mut stream_task = tokio::spawn(stream_server.run());

    tracing::info!("FX Rate Stream ready");

    let outcome = tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => Ok(()),
        result = &mut stream_task => server_exit("stream", result),
        result = &mut health_task => server_exit("health", result),
    };
    shutdown_token.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        if let Err(e) = engine_task.await {
            tracing::error!(error = %e, "Broadcast engine task failed");
        }
        while registry.connection_count() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            connections = registry.connection_count(),
            "Shutdown timeout elapsed with sessions still open"
        );
    }

    tracing::info!("FX Rate Stream stopped");
    outcome
}

/// Load the configured catalog, or the bundled one.
fn load_catalog(config: &ServiceConfig) -> anyhow::Result<InstrumentCatalog> {
    match &config.catalog_path {
        Some(path) => InstrumentCatalog::from_path(path)
            .with_context(|| format!("failed to load catalog from {}", path.display())),
        None => InstrumentCatalog::bundled().context("bundled catalog is invalid"),
    }
}

/// Turn an unexpected server exit into an error.
fn server_exit<E>(name: &str, result: Result<Result<(), E>, JoinError>) -> anyhow::Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(Ok(())) => Err(anyhow::anyhow!("{name} server stopped unexpectedly")),
        Ok(Err(e)) => {
            tracing::error!(server = name, error = %e, "Server failed");
            Err(anyhow::Error::new(e).context(format!("{name} server failed")))
        }
        Err(e) => Err(anyhow::Error::new(e).context(format!("{name} server task panicked"))),
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        stream_port = config.server.stream_port,
        health_port = config.server.health_port,
        tick_interval_secs = config.tick.interval.as_secs(),
        volatility_bps = config.tick.volatility_bps,
        precision = config.tick.precision,
        queue_capacity = config.session.queue_capacity,
        "Configuration loaded"
    );
    if let Some(path) = &config.catalog_path {
        tracing::debug!(catalog = %path.display(), "Using catalog file");
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
