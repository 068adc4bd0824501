//! Action dispatch server (demo inventory).
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::listener ──▶ http::server ──▶ http::dispatcher
//!                     (bounded accept)  (hyper conn,     (route, body limit,
//!                                        middleware)      action lifecycle)
//!                                                               │
//!                                     ┌─────────────────────────┤
//!                                     ▼                         ▼
//!                              buffered reply           streaming::bridge
//!                                                       (pull per chunk,
//!     Client Response                                    cancel on drop)
//!     ◀────────────────────────────────────────────────────────┘
//!
//!     Cross-cutting: config, lifecycle, observability, resilience, sync
//! ```

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use action_dispatch::config::{load_config, ServerConfig};
use action_dispatch::lifecycle::serve;

#[derive(Parser)]
#[command(name = "action-dispatch")]
#[command(about = "Serve the demo inventory through the action dispatch pipeline", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    let registry = demo::registry(Arc::new(demo::Inventory::new()))?;
    serve(config, registry, None).await?;
    Ok(())
}
