//! pinquiz-back binary entrypoint wiring REST, WebSocket, and storage layers.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod error;
mod routes;
mod services;
mod state;

use config::AppConfig;
use dao::session_store::memory::MemorySessionStore;
use state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_config = AppConfig::load();
    let app_state = AppState::new(app_config);

    bootstrap_store(&app_state);
    tokio::spawn(run_expiry_sweeper(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    // Flush in-flight sessions to the results sink before exiting.
    services::session_service::shutdown_all(&app_state);
    sleep(Duration::from_millis(500)).await;

    Ok(())
}

/// Pick and start the storage backend.
///
/// With `MONGO_URI` set (and the feature compiled in) a supervisor keeps the
/// MongoDB connection alive in the background; otherwise the in-process store
/// is installed immediately and the server never runs degraded.
fn bootstrap_store(state: &SharedState) {
    #[cfg(feature = "mongo-store")]
    if let Ok(uri) = env::var("MONGO_URI") {
        let db_name = env::var("MONGO_DB").ok();
        tokio::spawn(run_mongo_supervisor(state.clone(), uri, db_name));
        return;
    }

    let state = state.clone();
    tokio::spawn(async move {
        info!("no MONGO_URI configured; using the in-memory session store");
        state
            .install_session_store(Arc::new(MemorySessionStore::new()))
            .await;
    });
}

/// Supervises the MongoDB connection by retrying in the background and toggling
/// degraded mode when connectivity changes.
#[cfg(feature = "mongo-store")]
async fn run_mongo_supervisor(state: SharedState, uri: String, db_name: Option<String>) {
    use crate::dao::session_store::mongodb::{MongoConfig, MongoSessionStore};

    let initial_delay_ms = 1000;
    let mut delay = Duration::from_millis(initial_delay_ms);
    let max_delay = Duration::from_secs(10);

    loop {
        if let Some(store) = state.session_store().await {
            match store.health_check().await {
                Ok(_) => {
                    // Healthy connection: reset the retry backoff and avoid
                    // hammering the database with pings.
                    delay = Duration::from_millis(initial_delay_ms);
                    sleep(Duration::from_secs(5)).await;
                }
                Err(err) => {
                    // Existing connection failed: drop it, flip to degraded
                    // mode, and retry with exponential backoff.
                    warn!(error = %err, "store ping failed; entering degraded mode");
                    state.clear_session_store().await;
                    sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
            continue;
        }

        let config = match MongoConfig::from_uri(&uri, db_name.as_deref()).await {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "invalid MongoDB configuration");
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
                continue;
            }
        };

        match MongoSessionStore::connect(config, state.config().session_ttl).await {
            Ok(store) => {
                // Fresh connection and indexes ready: install it and leave
                // degraded mode.
                info!("connected to MongoDB; leaving degraded mode");
                state.install_session_store(Arc::new(store)).await;
                delay = Duration::from_millis(initial_delay_ms);
            }
            Err(err) => {
                // Could not reach MongoDB at all: wait and retry with
                // exponential backoff.
                warn!(error = %err, "MongoDB connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

/// Periodically evict expired sessions from stores without native TTL support.
async fn run_expiry_sweeper(state: SharedState) {
    let mut tick = tokio::time::interval(Duration::from_secs(30));
    loop {
        tick.tick().await;
        let Some(store) = state.session_store().await else {
            continue;
        };
        match store.sweep_expired().await {
            Ok(evicted) => {
                for pin in evicted {
                    info!(%pin, "evicted idle session; PIN released");
                    state.registry().drop_session(&pin);
                }
            }
            Err(err) => warn!(error = %err, "expiry sweep failed"),
        }
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
