//! Health check response payload.

use serde::Serialize;

/// Liveness report returned by the health endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status, always `"ok"` when the server responds.
    pub status: &'static str,
    /// Number of live WebSocket connections, players and viewers combined.
    pub connections: usize,
}
