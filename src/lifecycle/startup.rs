//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and metrics from configuration
//! - Freeze the registry (setup errors are fatal here)
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;

use thiserror::Error;

use crate::action::{Registry, SetupError};
use crate::config::{ConfigError, ServerConfig};
use crate::http::{Dispatcher, FaultCallback, HttpServer, ServeError};
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("setup error: {0}")]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("metrics exporter: {0}")]
    Metrics(String),

    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Run a dispatch server for `registry` until a signal or an unhandled fault stops it.
pub async fn serve(
    config: ServerConfig,
    registry: Registry,
    on_fault: Option<FaultCallback>,
) -> Result<(), StartupError> {
    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "action-dispatch starting");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|e: std::net::AddrParseError| StartupError::Metrics(e.to_string()))?;
        metrics::init_metrics(addr).map_err(|e| StartupError::Metrics(e.to_string()))?;
    }

    let registry = registry.freeze()?;
    tracing::info!(
        actions = registry.len(),
        routes = registry.route_count(),
        "registry frozen"
    );

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_watcher(shutdown.clone());

    let dispatcher = Dispatcher::new(registry, &config, shutdown).fault_callback(on_fault);
    HttpServer::new(&config, dispatcher).run(listener).await?;
    Ok(())
}
