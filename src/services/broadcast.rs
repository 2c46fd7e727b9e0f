//! Best-effort message fan-out over the connection registry.
//!
//! A send failure tears down that one connection and the loop continues; a
//! single bad socket must never abort a broadcast.

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::{dto::ws::ServerMessage, state::AppState};

/// Which connections a broadcast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    Players,
    PlayersAndViewers,
    Viewers,
}

/// Queue a message on one connection's writer.
///
/// Returns `false` when the writer is gone; callers holding the registry can
/// use that to drop the entry.
pub fn send_to_tx(tx: &mpsc::UnboundedSender<Message>, message: &ServerMessage) -> bool {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            // Serialization failure is a bug, not a connection problem.
            warn!(error = %err, "failed to serialize server message");
            return true;
        }
    };
    tx.send(Message::Text(payload.into())).is_ok()
}

/// Send to a single connection by id, removing it if the writer is gone.
pub fn send_to_connection(state: &AppState, connection_id: Uuid, message: &ServerMessage) {
    let Some(tx) = state
        .connections()
        .get(&connection_id)
        .map(|conn| conn.tx.clone())
    else {
        return;
    };
    if !send_to_tx(&tx, message) {
        warn!(%connection_id, "send failed; dropping connection");
        state.connections().remove(&connection_id);
    }
}

/// Send to every player connection, optionally excluding participant ids
/// (used to avoid echoing a join notice back to the joiner).
pub fn broadcast_players(state: &AppState, message: &ServerMessage, exclude: &[&str]) {
    fan_out(state, message, Audience::Players, exclude);
}

/// Send to every connection, players and viewers alike.
pub fn broadcast_all(state: &AppState, message: &ServerMessage) {
    fan_out(state, message, Audience::PlayersAndViewers, &[]);
}

/// Send to viewer connections only.
pub fn broadcast_viewers(state: &AppState, message: &ServerMessage) {
    fan_out(state, message, Audience::Viewers, &[]);
}

fn fan_out(state: &AppState, message: &ServerMessage, audience: Audience, exclude: &[&str]) {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize server message");
            return;
        }
    };

    let mut dead = Vec::new();
    for entry in state.connections().iter() {
        let connection = entry.value();
        let wanted = match audience {
            Audience::Players => !connection.viewer,
            Audience::PlayersAndViewers => true,
            Audience::Viewers => connection.viewer,
        };
        if !wanted {
            continue;
        }
        if let Some(participant_id) = connection.participant_id.as_deref() {
            if exclude.contains(&participant_id) {
                continue;
            }
        }
        if connection
            .tx
            .send(Message::Text(payload.clone().into()))
            .is_err()
        {
            dead.push(connection.id);
        }
    }

    for connection_id in dead {
        warn!(%connection_id, "send failed during fan-out; dropping connection");
        state.connections().remove(&connection_id);
    }
}
