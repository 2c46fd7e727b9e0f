//! Shared application state: connection registry and the single game session.

pub mod phase;
pub mod session;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::{config::GameConfig, dao::QuizApi, state::session::GameSession};

/// Shared handle to the per-process application state.
pub type SharedState = Arc<AppState>;

#[derive(Debug, Clone)]
/// Handle used to push frames to one connected client.
pub struct ClientConnection {
    /// Connection identifier, distinct from the participant identity.
    pub id: Uuid,
    /// Identity bound to this connection; `None` for viewers.
    pub participant_id: Option<String>,
    /// Whether this connection is a read-only viewer.
    pub viewer: bool,
    /// Outbound frame queue drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: configuration, the connection registry, and the
/// single game session everything serializes through.
pub struct AppState {
    config: GameConfig,
    api: Arc<dyn QuizApi>,
    connections: DashMap<Uuid, ClientConnection>,
    session: Mutex<GameSession>,
}

impl AppState {
    /// Construct the shared state around an API client.
    pub fn new(config: GameConfig, api: Arc<dyn QuizApi>) -> SharedState {
        Arc::new(Self {
            config,
            api,
            connections: DashMap::new(),
            session: Mutex::new(GameSession::new()),
        })
    }

    /// Gameplay configuration.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Client for the external identity / question / leaderboard service.
    pub fn api(&self) -> Arc<dyn QuizApi> {
        self.api.clone()
    }

    /// Registry of live sockets keyed by connection id.
    pub fn connections(&self) -> &DashMap<Uuid, ClientConnection> {
        &self.connections
    }

    /// The authoritative game session; all state mutation locks this.
    pub fn session(&self) -> &Mutex<GameSession> {
        &self.session
    }

    /// Number of read-only viewer connections.
    pub fn viewer_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.viewer)
            .count()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
