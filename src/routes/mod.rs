//! HTTP route composition.

use axum::Router;

use crate::state::SharedState;

/// Health check endpoint.
pub mod health;
/// WebSocket upgrade endpoint.
pub mod websocket;

/// Compose all route trees, wiring in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(websocket::router())
        .with_state(state)
}
