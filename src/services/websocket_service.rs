//! WebSocket connection lifecycle: admission, catch-up, heartbeat, teardown.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::ResolvedIdentity,
    dto::{
        validation,
        ws::{ClientMessage, GameInfo, RoundInfo, ServerMessage, TimeInfo},
    },
    services::{broadcast, round_service},
    state::{ClientConnection, SharedState, phase::GamePhase, session::now_ms},
};

/// How long a replaced connection gets to finish closing before the fresh one
/// takes over the identity.
const RECONNECT_GRACE: Duration = Duration::from_millis(100);

/// Handle the full lifecycle of one game WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // Identity resolution suspends only this connection path; a running
    // round's timers are unaffected.
    let identity = match token {
        Some(token) => match state.api().resolve_identity(token).await {
            Ok(identity) => Some(identity),
            Err(err) => {
                warn!(error = %err, "identity lookup failed; downgrading to viewer");
                None
            }
        },
        None => None,
    };

    let connection_id = Uuid::new_v4();
    let participant_id = match identity {
        Some(identity) => {
            let id = identity.id.clone();
            admit_player(&state, identity, connection_id, outbound_tx.clone()).await;
            Some(id)
        }
        None if state.config().allow_viewers => {
            admit_viewer(&state, connection_id, outbound_tx.clone()).await;
            None
        }
        None => {
            broadcast::send_to_tx(
                &outbound_tx,
                &ServerMessage::Error {
                    message: "Authentication required".into(),
                },
            );
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let (mut heartbeat_task, pong_seen) = spawn_heartbeat(
        connection_id,
        outbound_tx.clone(),
        state.config().heartbeat_interval,
    );

    // The heartbeat finishing means the socket is considered dead; tear the
    // participant down right away instead of waiting for the TCP stack to
    // give up on a half-open connection.
    loop {
        tokio::select! {
            _ = &mut heartbeat_task => {
                break;
            }
            incoming = receiver.next() => {
                let Some(message) = incoming else {
                    break;
                };
                match message {
                    Ok(Message::Text(text)) => {
                        pong_seen.store(true, Ordering::SeqCst);
                        handle_text(&state, connection_id, participant_id.as_deref(), &text).await;
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = outbound_tx.send(Message::Pong(payload));
                    }
                    Ok(Message::Pong(_)) => {
                        pong_seen.store(true, Ordering::SeqCst);
                    }
                    Ok(Message::Close(frame)) => {
                        info!(%connection_id, "client closed");
                        let _ = outbound_tx.send(Message::Close(frame));
                        break;
                    }
                    Ok(Message::Binary(_)) => {}
                    Err(err) => {
                        warn!(%connection_id, error = %err, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    heartbeat_task.abort();
    handle_disconnect(&state, connection_id, participant_id.as_deref()).await;
    finalize(writer_task, outbound_tx).await;
}

/// Admit (or revive) an authenticated player and send their catch-up state.
async fn admit_player(
    state: &SharedState,
    identity: ResolvedIdentity,
    connection_id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
) {
    let participant_id = identity.id.clone();
    let (snapshot, stale_connection) = {
        let mut session = state.session().lock().await;
        session.resume(identity, connection_id, state.config().max_lives, now_ms())
    };

    // Reconnect-as-same-participant: the old socket is told to go away and
    // given a moment to do so before the new one is announced.
    if let Some(stale_id) = stale_connection {
        if let Some((_, old)) = state.connections().remove(&stale_id) {
            let _ = old.tx.send(Message::Close(None));
        }
        sleep(RECONNECT_GRACE).await;
    }

    state.connections().insert(
        connection_id,
        ClientConnection {
            id: connection_id,
            participant_id: Some(participant_id.clone()),
            viewer: false,
            tx: tx.clone(),
        },
    );
    info!(%connection_id, participant_id = %participant_id, "player connected");

    let (game, roster) = {
        let session = state.session().lock().await;
        (
            GameInfo {
                round_time: state.config().round_time.as_millis() as u64,
                max_lives: state.config().max_lives,
                total_questions: session.questions.len(),
            },
            session.roster(),
        )
    };
    let lives = snapshot.lives;
    broadcast::send_to_tx(
        &tx,
        &ServerMessage::Connected {
            player: Some(snapshot.clone()),
            game,
            players: roster.clone(),
            viewer_count: state.viewer_count(),
        },
    );
    broadcast::broadcast_players(
        state,
        &ServerMessage::PlayerJoined {
            player: snapshot,
            players: roster,
        },
        &[&participant_id],
    );

    // Phase-based check: any join that finds the game idle may start it.
    // Racing joins both pass, but the phase machine rejects the second
    // QuestionStarted transition, so exactly one round begins.
    let needs_question = {
        let session = state.session().lock().await;
        session.phase == GamePhase::Idle && session.current_question.is_none()
    };
    if needs_question {
        match round_service::ensure_questions(state).await {
            Ok(()) => round_service::start_round(state).await,
            Err(err) => {
                warn!(error = %err, "could not load questions for first player");
                broadcast::send_to_tx(
                    &tx,
                    &ServerMessage::Error {
                        message: "The game could not be started, please try again later.".into(),
                    },
                );
            }
        }
    } else {
        send_catch_up(state, &tx, Some(lives)).await;
    }
}

/// Admit an anonymous read-only viewer.
async fn admit_viewer(state: &SharedState, connection_id: Uuid, tx: mpsc::UnboundedSender<Message>) {
    state.connections().insert(
        connection_id,
        ClientConnection {
            id: connection_id,
            participant_id: None,
            viewer: true,
            tx: tx.clone(),
        },
    );
    let count = state.viewer_count();
    info!(%connection_id, viewers = count, "viewer connected");

    let (game, roster) = {
        let session = state.session().lock().await;
        (
            GameInfo {
                round_time: state.config().round_time.as_millis() as u64,
                max_lives: state.config().max_lives,
                total_questions: session.questions.len(),
            },
            session.roster(),
        )
    };
    broadcast::send_to_tx(
        &tx,
        &ServerMessage::Connected {
            player: None,
            game,
            players: roster,
            viewer_count: count,
        },
    );
    broadcast::broadcast_all(state, &ServerMessage::ViewerCountUpdate { count });

    send_catch_up(state, &tx, None).await;
}

/// Send a late joiner the current question and the relevant countdown so their
/// client state matches everyone else's.
async fn send_catch_up(state: &SharedState, tx: &mpsc::UnboundedSender<Message>, lives: Option<u8>) {
    let session = state.session().lock().await;
    let Some(question) = session.current_question.as_ref() else {
        return;
    };

    let now = now_ms();
    let round_time = state.config().round_time.as_millis() as u64;
    let time = TimeInfo::at(session.round_started_at, round_time, now);

    broadcast::send_to_tx(
        tx,
        &ServerMessage::Question {
            question: question.public_payload(),
            round: RoundInfo {
                question_number: session.question_index + 1,
                total_questions: session.questions.len(),
                timestamp: session.round_started_at.unwrap_or(now),
                remaining: Some(time.remaining),
            },
            lives,
        },
    );

    if session.waiting_started_at.is_some() {
        let waiting = TimeInfo::at(
            session.waiting_started_at,
            state.config().next_question_delay.as_millis() as u64,
            now,
        );
        broadcast::send_to_tx(tx, &ServerMessage::WaitingNext { time: waiting });
    } else if time.remaining > 0 {
        broadcast::send_to_tx(tx, &ServerMessage::TimeUpdate { time });
    }
}

/// Dispatch one inbound text frame.
async fn handle_text(
    state: &SharedState,
    connection_id: Uuid,
    participant_id: Option<&str>,
    text: &str,
) {
    let parsed = match ClientMessage::from_json_str(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%connection_id, error = %err, "malformed client message");
            broadcast::send_to_connection(
                state,
                connection_id,
                &ServerMessage::Error {
                    message: "Invalid message format".into(),
                },
            );
            return;
        }
    };

    match parsed {
        ClientMessage::Answer { answer } => {
            let Some(participant_id) = participant_id else {
                broadcast::send_to_connection(
                    state,
                    connection_id,
                    &ServerMessage::Error {
                        message: "Viewers cannot submit answers".into(),
                    },
                );
                return;
            };
            if let Err(err) = validation::validate_answer(&answer) {
                broadcast::send_to_connection(
                    state,
                    connection_id,
                    &ServerMessage::Error {
                        message: err
                            .message
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| "Invalid answer format".into()),
                    },
                );
                return;
            }
            round_service::handle_answer(state, participant_id, &answer).await;
        }
        ClientMessage::ChatMessage { message } => {
            let Some(participant_id) = participant_id else {
                broadcast::send_to_connection(
                    state,
                    connection_id,
                    &ServerMessage::Error {
                        message: "Viewers cannot chat".into(),
                    },
                );
                return;
            };
            if let Err(err) = validation::validate_chat(&message, state.config().max_chat_length) {
                broadcast::send_to_connection(
                    state,
                    connection_id,
                    &ServerMessage::Error {
                        message: err
                            .message
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| "Invalid chat message".into()),
                    },
                );
                return;
            }
            let from = {
                let session = state.session().lock().await;
                session
                    .participants
                    .get(participant_id)
                    .map(|participant| participant.name.clone())
            };
            let Some(from) = from else {
                return;
            };
            // Chat is a stateless relay; everyone connected hears it.
            broadcast::broadcast_all(state, &ServerMessage::ChatMessage { from, message });
        }
        ClientMessage::Unknown => {
            broadcast::send_to_connection(
                state,
                connection_id,
                &ServerMessage::Error {
                    message: "Unknown message type".into(),
                },
            );
        }
    }
}

/// Keep-alive: ping every interval, terminate after one missed reply cycle.
///
/// The task only signals; the socket loop observes its completion and runs
/// the full teardown path, so dead participants leave the session promptly.
fn spawn_heartbeat(
    connection_id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let pong_seen = Arc::new(AtomicBool::new(true));
    let flag = pong_seen.clone();
    let task = tokio::spawn(async move {
        loop {
            sleep(interval).await;
            if !flag.swap(false, Ordering::SeqCst) {
                warn!(%connection_id, "heartbeat missed; terminating connection");
                let _ = tx.send(Message::Close(None));
                return;
            }
            if tx.send(Message::Ping(Vec::new().into())).is_err() {
                return;
            }
        }
    });
    (task, pong_seen)
}

/// Tear down a closed connection and park the game when the room empties.
async fn handle_disconnect(state: &SharedState, connection_id: Uuid, participant_id: Option<&str>) {
    state.connections().remove(&connection_id);

    let Some(participant_id) = participant_id else {
        let count = state.viewer_count();
        info!(%connection_id, viewers = count, "viewer disconnected");
        broadcast::broadcast_all(state, &ServerMessage::ViewerCountUpdate { count });
        return;
    };

    let departed = {
        let mut session = state.session().lock().await;
        // A reconnect may have already rebound the identity to a newer
        // connection; only the owning connection tears the participant down.
        let owns_entry = session
            .participants
            .get(participant_id)
            .is_some_and(|participant| participant.connection_id == connection_id);
        if !owns_entry {
            None
        } else {
            let snapshot = session.remove_participant(participant_id);
            if session.participants.is_empty() {
                info!("last player left; parking game");
                session.park();
            }
            snapshot.map(|snapshot| (snapshot, session.roster()))
        }
    };

    if let Some((player, players)) = departed {
        info!(%connection_id, participant_id, "player disconnected");
        broadcast::broadcast_players(
            state,
            &ServerMessage::PlayerLeft { player, players },
            &[],
        );
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
