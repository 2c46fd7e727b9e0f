//! Round lifecycle phase machine.
//!
//! The session advances `Idle → QuestionActive → WaitingNext → QuestionActive …`
//! until the question list runs out, detours through `Restarting`, and parks
//! back in `Idle` whenever the last participant leaves.

use thiserror::Error;

/// High-level phases the live session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GamePhase {
    /// No participants or no question; timers are dead.
    #[default]
    Idle,
    /// A question is live and both round timers are running.
    QuestionActive,
    /// The round resolved; counting down to the next question.
    WaitingNext,
    /// Question list exhausted; leaderboard sent, re-fetching questions.
    Restarting,
}

/// Events that drive phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A fresh question was selected and broadcast.
    QuestionStarted,
    /// The answer window expired and the round resolved.
    TimeUp,
    /// The next question was due but the list is exhausted.
    ListExhausted,
    /// The last participant disconnected; discard in-flight state.
    Park,
}

/// Error returned when an event cannot be applied from the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in when the event arrived.
    pub from: GamePhase,
    /// The rejected event.
    pub event: PhaseEvent,
}

impl GamePhase {
    /// Compute the phase reached by applying `event`, if the transition is valid.
    pub fn transition(self, event: PhaseEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self, event) {
            (GamePhase::Idle, PhaseEvent::QuestionStarted) => GamePhase::QuestionActive,
            (GamePhase::WaitingNext, PhaseEvent::QuestionStarted) => GamePhase::QuestionActive,
            (GamePhase::Restarting, PhaseEvent::QuestionStarted) => GamePhase::QuestionActive,
            (GamePhase::QuestionActive, PhaseEvent::TimeUp) => GamePhase::WaitingNext,
            (GamePhase::Idle, PhaseEvent::ListExhausted) => GamePhase::Restarting,
            (GamePhase::WaitingNext, PhaseEvent::ListExhausted) => GamePhase::Restarting,
            (_, PhaseEvent::Park) => GamePhase::Idle,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}
