//! Runtime configuration for the game engine and its external collaborators.

use std::env;
use std::time::Duration;

use tracing::warn;

/// Default answer window for a single question, in milliseconds.
const DEFAULT_ROUND_TIME_MS: u64 = 30_000;
/// Default pause between a resolved round and the next question, in milliseconds.
const DEFAULT_NEXT_QUESTION_DELAY_MS: u64 = 5_000;
/// Default pause after the question list is exhausted and the game restarts.
const DEFAULT_RESTART_DELAY_MS: u64 = 3_000;
/// Default number of wrong answers a player may burn per round.
const DEFAULT_MAX_LIVES: u8 = 3;
/// Default ping cadence; one missed pong terminates the connection.
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Default upper bound on relayed chat message length.
const DEFAULT_MAX_CHAT_LENGTH: usize = 500;
/// Rank-indexed base scores: first correct answer earns the head of the table.
const DEFAULT_BASE_SCORES: [u32; 10] = [10, 9, 8, 7, 6, 5, 4, 3, 2, 1];

#[derive(Debug, Clone)]
/// Gameplay tuning knobs, all overridable through the environment.
pub struct GameConfig {
    /// Answer window for a single question.
    pub round_time: Duration,
    /// Delay between rounds while the next question is pending.
    pub next_question_delay: Duration,
    /// Delay before the first question after a full restart.
    pub restart_delay: Duration,
    /// Lives granted to every player at the start of each round.
    pub max_lives: u8,
    /// Base score table indexed by arrival rank among correct answers.
    pub base_scores: Vec<u32>,
    /// Number of rewarded ranks per round; later correct answers earn zero.
    pub max_score_players: usize,
    /// Multiplier applied to the fraction of round time remaining at answer time.
    pub time_bonus_factor: f64,
    /// Multiplier applied per failed attempt; disabled (0.0) by default.
    pub attempt_penalty_factor: f64,
    /// Interval between keep-alive pings.
    pub heartbeat_interval: Duration,
    /// Maximum accepted chat message length in characters.
    pub max_chat_length: usize,
    /// Whether anonymous read-only viewers are admitted.
    pub allow_viewers: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_time: Duration::from_millis(DEFAULT_ROUND_TIME_MS),
            next_question_delay: Duration::from_millis(DEFAULT_NEXT_QUESTION_DELAY_MS),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            max_lives: DEFAULT_MAX_LIVES,
            base_scores: DEFAULT_BASE_SCORES.to_vec(),
            max_score_players: DEFAULT_BASE_SCORES.len(),
            time_bonus_factor: 0.0,
            attempt_penalty_factor: 0.0,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            max_chat_length: DEFAULT_MAX_CHAT_LENGTH,
            allow_viewers: true,
        }
    }
}

impl GameConfig {
    /// Build the gameplay configuration from environment overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            round_time: env_duration_ms("ROUND_TIME", defaults.round_time),
            next_question_delay: env_duration_ms(
                "NEXT_QUESTION_DELAY",
                defaults.next_question_delay,
            ),
            restart_delay: env_duration_ms("RESTART_DELAY", defaults.restart_delay),
            max_lives: env_parsed("MAX_LIVES", defaults.max_lives),
            base_scores: defaults.base_scores,
            max_score_players: env_parsed("MAX_SCORE_PLAYERS", defaults.max_score_players),
            time_bonus_factor: env_parsed("TIME_BONUS_FACTOR", defaults.time_bonus_factor),
            attempt_penalty_factor: env_parsed(
                "ATTEMPT_PENALTY_FACTOR",
                defaults.attempt_penalty_factor,
            ),
            heartbeat_interval: env_duration_ms("HEARTBEAT_INTERVAL", defaults.heartbeat_interval),
            max_chat_length: env_parsed("MAX_CHAT_LENGTH", defaults.max_chat_length),
            allow_viewers: env_parsed("ALLOW_VIEWERS", defaults.allow_viewers),
        }
    }

    /// Base score for a zero-indexed arrival rank, zero beyond the rewarded ranks.
    pub fn base_score_for_rank(&self, rank: usize) -> u32 {
        if rank >= self.max_score_players {
            return 0;
        }
        self.base_scores.get(rank).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
/// Location of the external identity / question-bank / leaderboard service.
pub struct ApiConfig {
    /// Base URL of the backing REST API.
    pub base_url: String,
    /// TCP port the WebSocket server binds to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".into(),
            port: 8080,
        }
    }
}

impl ApiConfig {
    /// Build the API configuration from environment overrides.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("API_URL").unwrap_or(defaults.base_url),
            port: env_parsed("PORT", defaults.port),
        }
    }
}

/// Parse an environment variable, falling back (with a warning) on bad input.
fn env_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "unparseable environment override; using default");
            default
        }),
        Err(_) => default,
    }
}

/// Parse a millisecond environment variable into a [`Duration`].
fn env_duration_ms(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parsed(name, default.as_millis() as u64))
}
