//! Main entry point for the intake server binary

use anyhow::Result;
use intake_core::{create_app, run_server, AppConfig, AppState, StoreConfig, StoreEngine};
use std::{net::SocketAddr, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", config.bind_address());

    let addr: SocketAddr = config.bind_address().parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    let store = StoreEngine::new(StoreConfig::from(&config.storage))
        .map_err(|e| anyhow::anyhow!("Failed to configure store: {}", e))?;

    store.initialize().await
        .map_err(|e| anyhow::anyhow!("Failed to initialize managed directory: {}", e))?;

    info!("Managed directory: {}", store.directory().display());
    info!("Accepting .{} files as {}", config.storage.extension, config.storage.content_type);

    let state = AppState::new(store, config.auth.admin_token.clone());
    info!("App: {} v{}", state.app_name, state.version);

    let app = create_app(state);

    run_server(app, addr, Duration::from_secs(config.server.shutdown_timeout_seconds)).await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let default_level = if cfg!(debug_assertions) {
                "debug"
            } else {
                "info"
            };

            format!(
                "{}={level},intake_core={level},tower_http=debug",
                env!("CARGO_CRATE_NAME").replace('-', "_"),
                level = default_level
            ).into()
        });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let is_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }
}
