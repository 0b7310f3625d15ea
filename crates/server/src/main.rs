mod bootstrap;
mod compliance;
mod health;
mod webhooks;

use std::sync::Arc;

use anyhow::Result;
use citabot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use citabot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = health::router(Arc::clone(&app.hub))
        .merge(webhooks::router(Arc::clone(&app.orchestrator)))
        .merge(compliance::router(
            app.db_pool.clone(),
            Arc::clone(&app.sweeper),
            &app.config.retention,
        ));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        messaging = app.hub.messaging_configured(),
        ai = app.hub.ai_configured(),
        scheduling = app.hub.scheduling_configured(),
        "citabot-server started"
    );

    let drain_secs = app.config.server.graceful_shutdown_secs;
    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(drain_secs))
        .await?;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "citabot-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown(drain_secs: u64) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            "shutdown signal listener failed; stopping immediately"
        );
        return;
    }
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        drain_secs,
        "shutdown signal received; draining in-flight requests"
    );
}
