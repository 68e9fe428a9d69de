//! Soccer Game Server - Authoritative match orchestration server
//!
//! This is the main entry point for the game server. It handles:
//! - WebSocket connections for real-time match signals and intents
//! - The match engine tick loop (state machine, clock, restarts)
//! - HTTP endpoints for health, match reports, and admin controls

mod app;
mod config;
mod game;
mod http;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::{EngineHost, MatchContext};
use crate::http::build_router;
use crate::util::time::init_server_time;
use crate::ws::protocol::ServerIntent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level);

    // Uptime is measured from here
    init_server_time();

    info!("Starting Soccer Game Server");
    info!("Server address: {}", config.server_addr);

    // Spawn the match engine
    let seed = config.engine_seed.unwrap_or_else(rand::random);
    let ctx = MatchContext::new(config.rules);
    let (engine_host, engine_handle) = EngineHost::new(ctx, seed);
    tokio::spawn(engine_host.run());

    let state = AppState::new(config.clone(), engine_handle);

    // Record finished-match reports for the /report endpoint
    spawn_report_recorder(&state);

    let router = build_router(state);

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Capture GameOver reports off the intent stream so HTTP clients can
/// fetch the last result after the engine has returned to the lobby
fn spawn_report_recorder(state: &AppState) {
    let mut intent_rx = state.engine.intent_tx.subscribe();
    let last_report = state.last_report.clone();

    tokio::spawn(async move {
        loop {
            match intent_rx.recv().await {
                Ok(ServerIntent::GameOver { report }) => {
                    info!(
                        red = report.red_score,
                        blue = report.blue_score,
                        "Match finished, report recorded"
                    );
                    *last_report.write() = Some(report);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Report recorder lagged behind intent stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
