//! Usion Arena Game Server - authoritative two-player space combat
//!
//! This is the main entry point for the game server. It handles:
//! - WebSocket connections for real-time gameplay on `/ws`
//! - Token verification against the upstream key set
//! - Per-room fixed-step simulation with delta broadcast
//! - Signed match-result webhooks to the matchmaking API

mod app;
mod auth;
mod config;
mod game;
mod http;
mod results;
mod util;
mod ws;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!(
        addr = %config.server_addr,
        region = %config.deploy_region,
        sim_hz = config.sim_tick_hz,
        net_hz = config.network_hz,
        "Starting Usion Arena Game Server"
    );

    // Create application state
    let state = AppState::new(config.clone());
    let shutdown_state = state.clone();

    // Build router
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(config.server_addr).await?;
    info!("Health: GET /health, game socket: GET /ws?token=<jwt>");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await?;

    info!("Listener closed, exiting");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` wins when set; otherwise `LOG_LEVEL`
/// applies crate-wide with the HTTP stack kept quiet.
fn init_tracing(log_level: &str) {
    let default_directives = format!("{log_level},hyper=warn,reqwest=warn");
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Resolve on SIGINT or SIGTERM. Rooms live as plain tasks, so draining the
/// listener is all the shutdown this server needs; in-flight matches are
/// reported as abandoned, not persisted.
async fn shutdown_signal(state: AppState) {
    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation failed");
    #[cfg(unix)]
    let terminate = sigterm.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    let signal = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate => "SIGTERM",
    };

    info!(
        signal,
        open_rooms = state.rooms.active_rooms(),
        open_sessions = state.rooms.total_sessions(),
        "Shutdown requested, closing listener"
    );
}
