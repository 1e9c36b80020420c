// Main entry point for the SP-API bridge

use std::sync::Arc;

use spapi_bridge::api::Core;
use spapi_bridge::config::Config;
use spapi_bridge::mcp::McpServer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load and validate configuration before any logging
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing. Logs go to stderr: stdout carries the protocol.
    init_tracing(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting spapi-bridge");
    info!(
        lwa_configured = config.has_lwa_credentials(),
        signing_configured = config.has_signing_credentials(),
        db = ?config.filter_db_path,
        "configuration loaded"
    );

    // 3. Build the core: limiter, credentials, dispatcher, filter catalog
    let core = Arc::new(Core::from_config(config).await?);
    info!("core initialized");

    // 4. Serve the tool protocol until stdin closes
    McpServer::new(core).run().await?;

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
