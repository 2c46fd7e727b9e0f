//! In-memory game session: participants, rounds, and score records.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::ResolvedIdentity;
use crate::dto::ws::{AnswerOutcome, PlayerSnapshot};
use crate::state::phase::{GamePhase, InvalidTransition, PhaseEvent};

/// A question as delivered by the question bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    /// Question-bank identifier.
    pub id: u64,
    /// Prompt text.
    pub question: String,
    /// First-letter hint shown to players.
    pub letter: String,
    /// Reference answer; comma separates accepted alternatives.
    pub answer: String,
}

impl Question {
    /// Client-facing fields of the question; the answer never leaves here.
    pub fn public_payload(&self) -> crate::dto::ws::QuestionPayload {
        crate::dto::ws::QuestionPayload {
            id: self.id,
            question: self.question.clone(),
            letter: self.letter.clone(),
        }
    }

    /// Accepted alternatives, trimmed; normalization is the matcher's job.
    pub fn accepted_answers(&self) -> impl Iterator<Item = &str> {
        self.answer
            .split(',')
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
    }
}

/// One connected player. Viewers never get an entry here; they are counted
/// connections only.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Stable identity: external user id or anonymous fingerprint.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Anonymous device fingerprint, when known.
    pub fingerprint: Option<String>,
    /// Whether the identity is a registered account.
    pub is_permanent: bool,
    /// Remaining lives in the current round.
    pub lives: u8,
    /// Durable score total sourced from the leaderboard service at admission.
    pub base_score: u64,
    /// Points accrued locally and not yet flushed to the leaderboard service.
    pub session_score: u64,
    /// Connection currently bound to this identity.
    pub connection_id: Uuid,
    /// Last inbound activity, epoch milliseconds.
    pub last_seen: u64,
}

impl Participant {
    fn from_identity(identity: ResolvedIdentity, connection_id: Uuid, lives: u8, now: u64) -> Self {
        Self {
            id: identity.id,
            name: identity.name,
            fingerprint: identity.fingerprint,
            is_permanent: identity.is_permanent,
            lives,
            base_score: identity.total_score,
            session_score: 0,
            connection_id,
            last_seen: now,
        }
    }
}

/// Score breakdown a participant earned in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundScore {
    /// One-based arrival rank among correct answers.
    pub rank: usize,
    /// Points from the rank table.
    pub base: u32,
    /// Time bonus, when the factor is enabled.
    pub time_bonus: u32,
    /// Attempt penalty, when the factor is enabled.
    pub attempt_penalty: u32,
    /// Net points for the round.
    pub total: u32,
}

/// Cumulative scoring state for one participant, kept across rounds and
/// reconnects within the session.
#[derive(Debug, Clone, Default)]
pub struct ScoreRecord {
    /// Points accrued this session and not yet flushed to the leaderboard
    /// service; successful flushes move points into the participant's base.
    pub total: u64,
    /// Sparse per-round breakdowns keyed by round index.
    pub rounds: HashMap<usize, RoundScore>,
    /// Ordered log of past round outcomes.
    pub history: Vec<AnswerOutcome>,
}

/// State scoped to the currently active round, keyed by
/// `(round_index, participant_id)` so entries from stale rounds are inert.
#[derive(Debug, Default)]
pub struct RoundBook {
    /// Remaining lives per participant this round; survives reconnects.
    pub lives: HashMap<(usize, String), u8>,
    /// Participants who already answered correctly this round.
    pub correct: HashSet<(usize, String)>,
    /// Response time from round start, milliseconds.
    pub response_times: HashMap<(usize, String), u64>,
    /// Wrong attempts burned this round.
    pub attempts: HashMap<(usize, String), u32>,
    /// Provisional points awarded at answer time, reconciled at resolution.
    pub estimated: HashMap<(usize, String), u32>,
    /// Correct answerers in arrival order; index is the zero-based rank.
    pub arrival_order: Vec<String>,
}

impl RoundBook {
    /// Drop all round-scoped state when a new round begins.
    pub fn clear(&mut self) {
        self.lives.clear();
        self.correct.clear();
        self.response_times.clear();
        self.attempts.clear();
        self.estimated.clear();
        self.arrival_order.clear();
    }
}

/// Authoritative per-process game state. Exactly one instance exists, owned by
/// [`crate::state::AppState`] behind a mutex so every mutation serializes.
#[derive(Debug, Default)]
pub struct GameSession {
    /// Current lifecycle phase.
    pub phase: GamePhase,
    /// Monotonic round generation. Every phase change bumps it; timer tasks
    /// capture the generation they were scheduled under and no-op when it has
    /// moved on.
    pub generation: u64,
    /// Ordered question list fetched from the question bank.
    pub questions: Vec<Question>,
    /// Index of the next question to select.
    pub question_index: usize,
    /// The live (or, while waiting, the just-resolved) question.
    pub current_question: Option<Question>,
    /// Round start, epoch milliseconds.
    pub round_started_at: Option<u64>,
    /// Waiting-period start, epoch milliseconds; set only between rounds.
    pub waiting_started_at: Option<u64>,
    /// Connected players keyed by identity, in join order.
    pub participants: IndexMap<String, Participant>,
    /// Round-scoped bookkeeping.
    pub round: RoundBook,
    /// Cumulative score records keyed by identity.
    pub scores: HashMap<String, ScoreRecord>,
}

impl GameSession {
    /// Fresh session with no questions loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a phase event and bump the generation, invalidating every timer
    /// scheduled under the previous generation.
    pub fn advance_phase(&mut self, event: PhaseEvent) -> Result<GamePhase, InvalidTransition> {
        let next = self.phase.transition(event)?;
        self.phase = next;
        self.generation += 1;
        Ok(next)
    }

    /// Whether a timer scheduled under `generation` is still current.
    pub fn is_current_generation(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Admit or revive a participant for `identity` on `connection_id`.
    ///
    /// The identity, not the connection, is the unit of continuity: when an
    /// entry already exists its lives and scores carry forward and the stale
    /// connection id is returned so the caller can close that socket. A stored
    /// round-lives entry for the current round wins over the refreshed value.
    pub fn resume(
        &mut self,
        identity: ResolvedIdentity,
        connection_id: Uuid,
        max_lives: u8,
        now: u64,
    ) -> (PlayerSnapshot, Option<Uuid>) {
        let previous = self.participants.shift_remove(&identity.id);
        let stale_connection = previous.as_ref().map(|old| old.connection_id);

        let mut participant =
            Participant::from_identity(identity, connection_id, max_lives, now);
        if let Some(old) = previous {
            participant.lives = old.lives;
            participant.base_score = old.base_score;
            participant.session_score = old.session_score;
            participant.is_permanent = participant.is_permanent || old.is_permanent;
        } else if let Some(record) = self.scores.get(&participant.id) {
            // Unflushed points outlive a disconnect; they are still owed to
            // the leaderboard service at the next resolution.
            participant.session_score = record.total;
        }

        if self.current_question.is_some() {
            let key = (self.question_index, participant.id.clone());
            if let Some(&round_lives) = self.round.lives.get(&key) {
                participant.lives = round_lives;
            }
        }

        let snapshot = self.snapshot_of(&participant);
        self.participants
            .insert(participant.id.clone(), participant);
        (snapshot, stale_connection)
    }

    /// Remove a participant, returning their final snapshot for the departure
    /// notice. Round-scoped state stays behind so a quick reconnect resumes it.
    pub fn remove_participant(&mut self, participant_id: &str) -> Option<PlayerSnapshot> {
        let participant = self.participants.shift_remove(participant_id)?;
        Some(self.snapshot_of(&participant))
    }

    /// Displayed total for a participant: external base plus unflushed
    /// session accrual.
    pub fn displayed_score(&self, participant: &Participant) -> u64 {
        let accrued = self
            .scores
            .get(&participant.id)
            .map(|record| record.total)
            .unwrap_or(0);
        participant.base_score + accrued
    }

    /// Public snapshot of a participant including the displayed score.
    pub fn snapshot_of(&self, participant: &Participant) -> PlayerSnapshot {
        PlayerSnapshot {
            id: participant.id.clone(),
            name: participant.name.clone(),
            fingerprint: participant.fingerprint.clone(),
            is_permanent: participant.is_permanent,
            lives: participant.lives,
            score: self.displayed_score(participant),
        }
    }

    /// Current roster in join order.
    pub fn roster(&self) -> Vec<PlayerSnapshot> {
        self.participants
            .values()
            .map(|participant| self.snapshot_of(participant))
            .collect()
    }

    /// Park cleanly in [`GamePhase::Idle`], discarding the in-flight question
    /// and round state while keeping score records.
    pub fn park(&mut self) {
        // Park is valid from every phase.
        let _ = self.advance_phase(PhaseEvent::Park);
        self.current_question = None;
        self.round_started_at = None;
        self.waiting_started_at = None;
        self.question_index = 0;
        self.round.clear();
    }

    /// Key into the round-scoped maps for the current round.
    pub fn round_key(&self, participant_id: &str) -> (usize, String) {
        (self.question_index, participant_id.to_string())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> ResolvedIdentity {
        ResolvedIdentity {
            id: id.into(),
            name: format!("player-{id}"),
            fingerprint: None,
            is_permanent: true,
            total_score: 40,
        }
    }

    #[test]
    fn resume_carries_identity_state_forward() {
        let mut session = GameSession::new();
        let first_conn = Uuid::new_v4();
        let (snapshot, stale) = session.resume(identity("u1"), first_conn, 3, 0);
        assert_eq!(snapshot.lives, 3);
        assert_eq!(snapshot.score, 40);
        assert!(stale.is_none());

        {
            let participant = session.participants.get_mut("u1").unwrap();
            participant.lives = 1;
            participant.session_score = 7;
        }
        session.scores.entry("u1".into()).or_default().total = 25;

        let second_conn = Uuid::new_v4();
        let (snapshot, stale) = session.resume(identity("u1"), second_conn, 3, 10);
        assert_eq!(stale, Some(first_conn));
        assert_eq!(snapshot.lives, 1);
        assert_eq!(snapshot.score, 40 + 25);
        assert_eq!(session.participants["u1"].session_score, 7);
        assert_eq!(session.participants["u1"].connection_id, second_conn);
    }

    #[test]
    fn rejoin_after_disconnect_restores_unflushed_points() {
        let mut session = GameSession::new();
        session.resume(identity("u1"), Uuid::new_v4(), 3, 0);
        session.scores.entry("u1".into()).or_default().total = 5;
        session.participants.get_mut("u1").unwrap().session_score = 5;

        session.remove_participant("u1");
        let (snapshot, _) = session.resume(identity("u1"), Uuid::new_v4(), 3, 10);

        assert_eq!(session.participants["u1"].session_score, 5);
        assert_eq!(snapshot.score, 40 + 5);
    }

    #[test]
    fn resume_prefers_stored_round_lives_mid_round() {
        let mut session = GameSession::new();
        session.current_question = Some(Question {
            id: 1,
            question: "?".into(),
            letter: "a".into(),
            answer: "ankara".into(),
        });
        session.question_index = 4;
        session.round.lives.insert((4, "u1".into()), 0);

        let (snapshot, _) = session.resume(identity("u1"), Uuid::new_v4(), 3, 0);
        assert_eq!(snapshot.lives, 0);
    }

    #[test]
    fn park_discards_round_state_but_keeps_scores() {
        let mut session = GameSession::new();
        session.advance_phase(PhaseEvent::QuestionStarted).unwrap();
        session.current_question = Some(Question {
            id: 1,
            question: "?".into(),
            letter: "a".into(),
            answer: "a".into(),
        });
        session.round_started_at = Some(123);
        session.question_index = 5;
        session.scores.entry("u1".into()).or_default().total = 30;
        let generation = session.generation;

        session.park();

        assert_eq!(session.phase, GamePhase::Idle);
        assert!(session.current_question.is_none());
        assert!(session.round_started_at.is_none());
        assert_eq!(session.question_index, 0);
        assert!(session.generation > generation);
        assert_eq!(session.scores["u1"].total, 30);
    }

    #[test]
    fn accepted_answers_split_on_commas() {
        let question = Question {
            id: 1,
            question: "?".into(),
            letter: "i".into(),
            answer: "İstanbul, Constantinople ,".into(),
        };
        let alternatives: Vec<&str> = question.accepted_answers().collect();
        assert_eq!(alternatives, ["İstanbul", "Constantinople"]);
    }
}
