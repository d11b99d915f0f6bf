mod api;
mod config;
mod crypto;
mod db;
mod events;
mod services;
mod shop;
mod state;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::order_consumer::OrderConsumer;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stockbridge_server=info,tower_http=info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let state = AppState::new(&config).await?;

    // The first broker dial is fatal; reconnection after that is the
    // bus's own business.
    state.bus.init().await?;
    OrderConsumer::register(&state.bus, state.pool.clone()).await;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "stockbridge-server listening");

    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.bus.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "ctrl-c handler failed");
    }
    info!("shutdown signal received");
}
