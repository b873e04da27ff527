#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! traild - audit-trail daemon
//!
//! Per-agent append-only signed event ledger with capability tokens and
//! reputation scoring, served over HTTP against PostgreSQL.

mod auth;
mod config;
mod db;
mod error;
mod models;
mod rate_limit;
mod routes;
mod schema;
mod services;
mod state;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use axum::middleware;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::rate_limit::RateLimitState;
use crate::state::AppState;

const CAPABILITY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    let default_filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(addr = %addr, "Starting traild");

    let pool = db::create_pool(&config).await?;
    schema::apply(&pool).await?;
    tracing::info!("Connected to PostgreSQL, schema applied");

    let rate_limiter = RateLimitState::new(config.rate_limit_max, config.rate_limit_window);
    rate_limiter.spawn_sweeper();

    let state = AppState::new(config, pool.clone());
    spawn_capability_sweeper(&state);

    let app = routes::router(state)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit::rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close().await;
    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Periodically transition elapsed capabilities to `expired`. The validator
/// treats elapsed `expires_at` as invalid regardless, so this only keeps the
/// stored status honest.
fn spawn_capability_sweeper(state: &AppState) {
    let capabilities = state.capabilities.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(CAPABILITY_SWEEP_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            match capabilities.expire_sweep().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(expired = n, "capability expiry sweep"),
                Err(e) => tracing::warn!(error = %e, "capability expiry sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Received shutdown signal");
}
