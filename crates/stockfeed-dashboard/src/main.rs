//! stockfeed - live per-symbol price dashboard.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::info;

/// Live stock price dashboard over a SignalR hub
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via STOCKFEED_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the hub URL from the configuration
    #[arg(long)]
    hub_url: Option<String>,

    /// Override the initial keys (comma separated, empty for none)
    #[arg(long, value_delimiter = ',')]
    keys: Option<Vec<String>>,
}

fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    stockfeed_ws::init_crypto();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(args));
    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(args: Args) -> Result<()> {
    // Determine config path: CLI arg > STOCKFEED_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("STOCKFEED_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let mut config = stockfeed_dashboard::AppConfig::from_file(&config_path)?;
    if let Some(url) = args.hub_url {
        config.hub.url = url;
    }
    if let Some(keys) = args.keys {
        config.dashboard.initial_keys = keys.into_iter().filter(|k| !k.trim().is_empty()).collect();
    }

    stockfeed_telemetry::init_logging(&config.logging.level)?;
    info!("Starting stockfeed v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %config_path, hub = %config.hub.url, "Configuration loaded");

    let app = stockfeed_dashboard::Application::new(config)?;
    app.run().await?;

    Ok(())
}
