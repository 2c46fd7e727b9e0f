//! External collaborators: identity service, question bank, and score sink.

pub mod http;
pub mod models;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::session::Question;
use models::{ResolvedIdentity, ScoreFlush};

/// Result alias for external API operations.
pub type DaoResult<T> = Result<T, DaoError>;

/// Error raised by the external API regardless of the failing endpoint.
#[derive(Debug, Error)]
pub enum DaoError {
    /// The request could not be sent or the response could not be read.
    #[error("api request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The API answered but flagged the operation as unsuccessful.
    #[error("api rejected the request: {0}")]
    Rejected(String),
}

/// Abstraction over the backing REST API.
///
/// The production implementation talks HTTP; tests install fakes so the round
/// engine can be driven without a network.
pub trait QuizApi: Send + Sync {
    /// Fetch the full unlimited-mode question list.
    fn fetch_questions(&self) -> BoxFuture<'static, DaoResult<Vec<Question>>>;
    /// Resolve a bearer token into a participant identity.
    fn resolve_identity(&self, token: String) -> BoxFuture<'static, DaoResult<ResolvedIdentity>>;
    /// Persist points a participant accrued during live play.
    fn flush_score(&self, report: ScoreFlush) -> BoxFuture<'static, DaoResult<()>>;
}
