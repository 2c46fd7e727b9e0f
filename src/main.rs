//! Trivia Live Back binary entrypoint wiring the HTTP, WebSocket, and upstream API layers.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_live_back::{
    config::{ApiConfig, GameConfig},
    dao::http::HttpQuizApi,
    routes, services,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let game_config = GameConfig::from_env();
    let api_config = ApiConfig::from_env();
    let port = api_config.port;

    let api = Arc::new(HttpQuizApi::new(api_config.base_url));
    let app_state = AppState::new(game_config, api);

    // Warm the question cache up front so the first player does not pay the
    // fetch latency; failure here is non-fatal, the first join retries.
    tokio::spawn(warm_question_cache(app_state.clone()));

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Attempt an eager question fetch at startup.
async fn warm_question_cache(state: SharedState) {
    match services::round_service::ensure_questions(&state).await {
        Ok(()) => {
            let count = state.session().lock().await.questions.len();
            info!(count, "question cache warmed");
        }
        Err(err) => {
            warn!(error = %err, "initial question fetch failed; will retry on first join");
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
