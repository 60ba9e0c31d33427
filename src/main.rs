//! Gateway binary.
//!
//! ```text
//! route-gateway [--config gateway.toml]
//! ```

use std::path::PathBuf;

use clap::Parser;

use route_gateway::config::{load_config, GatewayConfig};
use route_gateway::lifecycle::{start, wait_for_signal};
use route_gateway::observability::{init_logging, init_metrics};

#[derive(Debug, Parser)]
#[command(name = "route-gateway", version, about = "Runtime-reconfigurable API gateway")]
struct Cli {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        "route-gateway starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        request_timeout_secs = config.timeouts.request_secs,
        store = ?config.store.kind,
        cluster = config.cluster.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = start(config).await?;
    tracing::info!(address = %app.local_addr()?, "Listening for connections");
    app.run(wait_for_signal()).await?;
    Ok(())
}
