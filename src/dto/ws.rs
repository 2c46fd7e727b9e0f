//! Wire messages exchanged over the game WebSocket, as closed tagged unions.

use serde::{Deserialize, Serialize};

/// Public snapshot of a participant, sent in rosters and join/leave notices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    /// Stable identity: external user id or anonymous fingerprint.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Anonymous device fingerprint, when the identity service supplies one.
    pub fingerprint: Option<String>,
    /// Whether the identity is a registered (non-guest) account.
    pub is_permanent: bool,
    /// Remaining lives in the current round.
    pub lives: u8,
    /// Displayed score: external base total plus locally accrued total.
    pub score: u64,
}

/// Static game parameters sent once on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameInfo {
    /// Answer window per question, milliseconds.
    pub round_time: u64,
    /// Lives granted per round.
    pub max_lives: u8,
    /// Number of questions in the current list.
    pub total_questions: usize,
}

/// Question fields exposed to clients; the answer never travels here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionPayload {
    /// Question-bank identifier.
    pub id: u64,
    /// Prompt text.
    pub question: String,
    /// First-letter hint.
    pub letter: String,
}

/// Round metadata accompanying a question broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundInfo {
    /// One-based round number.
    pub question_number: usize,
    /// Total questions in the list.
    pub total_questions: usize,
    /// Round start, epoch milliseconds.
    pub timestamp: u64,
    /// Remaining time for late joiners; absent on the initial broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

/// Countdown snapshot sent on every tick, for both round and waiting timers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeInfo {
    /// Full window, milliseconds.
    pub total: u64,
    /// Elapsed since the window opened, milliseconds.
    pub elapsed: u64,
    /// Remaining, clamped to zero.
    pub remaining: u64,
    /// Elapsed percentage, floored.
    pub percentage: u64,
}

impl TimeInfo {
    /// Compute a countdown snapshot from a stored start timestamp.
    ///
    /// Wall-clock based so the countdown self-corrects after a scheduling
    /// hiccup instead of drifting with missed ticks.
    pub fn at(started_at: Option<u64>, total: u64, now: u64) -> Self {
        let Some(started_at) = started_at else {
            return Self {
                total,
                elapsed: 0,
                remaining: 0,
                percentage: 0,
            };
        };
        let elapsed = now.saturating_sub(started_at);
        Self {
            total,
            elapsed,
            remaining: total.saturating_sub(elapsed),
            percentage: if total == 0 { 100 } else { elapsed * 100 / total },
        }
    }
}

/// One entry of the ranked per-round score list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundScoreEntry {
    /// Participant identity.
    pub player_id: String,
    /// Display name at resolution time.
    pub player_name: String,
    /// One-based arrival rank among correct answers.
    pub rank: usize,
    /// Points from the rank table.
    pub base_score: u32,
    /// Configurable bonus for answering early in the window.
    pub time_bonus: u32,
    /// Configurable penalty per burned attempt.
    pub attempt_penalty: u32,
    /// Net points earned this round.
    pub earned_points: u32,
    /// Response time from round start, milliseconds.
    pub response_time: u64,
    /// Wrong attempts before the correct answer.
    pub attempt_count: u32,
    /// Displayed total before this round was applied.
    pub old_score: u64,
    /// Displayed total after this round was applied.
    pub new_score: u64,
}

/// Per-round outcome kept in a participant's answer history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutcome {
    /// Round the answer belonged to.
    pub round_index: usize,
    /// Displayed total after the round resolved.
    pub score: u64,
    /// Points earned in that round.
    pub earned_points: u32,
    /// Response time from round start, milliseconds.
    pub response_time: u64,
    /// Resolution timestamp, epoch milliseconds.
    pub timestamp: u64,
}

/// One entry of the cumulative leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameScoreEntry {
    /// Participant identity.
    pub player_id: String,
    /// Display name.
    pub player_name: String,
    /// Displayed total: base plus session accrual.
    pub total_score: u64,
    /// Ordered log of past round outcomes.
    pub answer_history: Vec<AnswerOutcome>,
    /// Mean response time over the history, when any.
    pub avg_response_time: Option<u64>,
}

/// Messages pushed from the server to game clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Admission acknowledgement with config and roster.
    Connected {
        /// Snapshot of the admitted participant; absent for viewers.
        #[serde(skip_serializing_if = "Option::is_none")]
        player: Option<PlayerSnapshot>,
        /// Static game parameters.
        game: GameInfo,
        /// Currently connected players in join order.
        players: Vec<PlayerSnapshot>,
        /// Currently connected viewers.
        viewer_count: usize,
    },
    /// A new (or, for late joiners, the current) question.
    Question {
        /// Question prompt fields.
        question: QuestionPayload,
        /// Round metadata.
        round: RoundInfo,
        /// The recipient's refreshed lives; omitted on the viewer variant.
        #[serde(skip_serializing_if = "Option::is_none")]
        lives: Option<u8>,
    },
    /// Per-second countdown while a question is active.
    TimeUpdate {
        /// Countdown snapshot.
        time: TimeInfo,
    },
    /// The round expired; reveals the reference answer.
    TimeUp {
        /// Literal correct answer text.
        correct_answer: String,
    },
    /// Per-second countdown while waiting for the next question.
    WaitingNext {
        /// Countdown snapshot.
        time: TimeInfo,
    },
    /// The question list was exhausted and the game is restarting.
    GameRestart,
    /// Outcome of a submitted answer, sent only to the submitter.
    AnswerResult {
        /// Whether the answer matched.
        correct: bool,
        /// Remaining lives this round.
        lives: u8,
        /// Displayed total after the answer.
        score: u64,
        /// Provisional points awarded for a correct answer.
        earned_points: u32,
        /// Response time from round start, milliseconds.
        response_time: u64,
        /// Response time in whole seconds.
        response_time_seconds: u64,
    },
    /// The submitter ran out of lives for this round.
    GameOver {
        /// Human-readable explanation.
        message: String,
        /// Displayed total, unchanged by the exhaustion itself.
        score: u64,
    },
    /// Final ranked list for the round that just resolved.
    RoundScores {
        /// Entries ordered by rank.
        scores: Vec<RoundScoreEntry>,
    },
    /// Cumulative leaderboard, broadcast before a restart.
    GameScores {
        /// Entries ordered by total, descending.
        scores: Vec<GameScoreEntry>,
    },
    /// A player joined the session.
    PlayerJoined {
        /// The joiner.
        player: PlayerSnapshot,
        /// Updated roster.
        players: Vec<PlayerSnapshot>,
    },
    /// A player left the session.
    PlayerLeft {
        /// The leaver's last snapshot.
        player: PlayerSnapshot,
        /// Updated roster.
        players: Vec<PlayerSnapshot>,
    },
    /// Viewer count changed.
    ViewerCountUpdate {
        /// Current number of read-only connections.
        count: usize,
    },
    /// Relayed free-text chat line.
    ChatMessage {
        /// Sender display name.
        from: String,
        /// Relayed text, already length-capped.
        message: String,
    },
    /// Human-readable error delivered to a single connection.
    Error {
        /// What went wrong.
        message: String,
    },
}

/// Messages accepted from game clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Free-text answer to the active question.
    Answer {
        /// Raw answer text.
        answer: String,
    },
    /// Free-text chat line to relay.
    ChatMessage {
        /// Raw chat text.
        message: String,
    },
    /// Anything with an unrecognized `type` tag.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parse an inbound frame, rejecting malformed JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_messages_carry_a_type_tag() {
        let message = ServerMessage::TimeUp {
            correct_answer: "ankara".into(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "time_up");
        assert_eq!(json["correct_answer"], "ankara");
    }

    #[test]
    fn viewer_question_variant_omits_lives() {
        let message = ServerMessage::Question {
            question: QuestionPayload {
                id: 7,
                question: "Başkent?".into(),
                letter: "a".into(),
            },
            round: RoundInfo {
                question_number: 1,
                total_questions: 10,
                timestamp: 0,
                remaining: None,
            },
            lives: None,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("lives").is_none());
        assert!(json["round"].get("remaining").is_none());
    }

    #[test]
    fn client_answer_parses_and_unknown_is_tolerated() {
        let parsed = ClientMessage::from_json_str(r#"{"type":"answer","answer":"izmir"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::Answer { answer } if answer == "izmir"));

        let unknown = ClientMessage::from_json_str(r#"{"type":"emote"}"#).unwrap();
        assert!(matches!(unknown, ClientMessage::Unknown));

        assert!(ClientMessage::from_json_str("{not json").is_err());
    }

    #[test]
    fn time_info_clamps_and_self_corrects_from_wall_clock() {
        let info = TimeInfo::at(Some(1_000), 30_000, 16_000);
        assert_eq!(info.elapsed, 15_000);
        assert_eq!(info.remaining, 15_000);
        assert_eq!(info.percentage, 50);

        let expired = TimeInfo::at(Some(1_000), 30_000, 90_000);
        assert_eq!(expired.remaining, 0);

        let unstarted = TimeInfo::at(None, 30_000, 90_000);
        assert_eq!(unstarted.remaining, 0);
        assert_eq!(unstarted.total, 30_000);
    }
}
