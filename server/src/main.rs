//! Hookline Server - Main Entry Point

use anyhow::Result;
use tracing::{error, info};

use hookline_server::{app::App, config, pipeline::HandlerRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookline_server=debug,tower_http=info".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Hookline Server"
    );

    let bind_address = config.bind_address.clone();
    let mut app = App::build(config, None, |_credentials| HandlerRegistry::new()).await?;
    if app.state.has_credentials() {
        info!("Outbound credential cache enabled");
    }
    let background = app.spawn_background()?;

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown = app.state.shutdown.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Received shutdown signal, cleaning up...");
        shutdown.cancel();
    };

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    app.dispose().await;
    for task in background {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }

    info!("Server shutdown complete");

    Ok(())
}
