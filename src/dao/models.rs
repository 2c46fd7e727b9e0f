//! Payload shapes exchanged with the backing REST API.

use serde::{Deserialize, Serialize};

/// Identity returned by the external identity service for a valid token.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedIdentity {
    /// Stable external user id.
    pub id: String,
    /// Display name.
    #[serde(rename = "username")]
    pub name: String,
    /// Anonymous device fingerprint, when known.
    pub fingerprint: Option<String>,
    /// Whether the account is registered rather than a guest.
    #[serde(default)]
    pub is_permanent: bool,
    /// Durable cumulative score held by the leaderboard service.
    #[serde(default)]
    pub total_score: u64,
}

/// Session points reported to the leaderboard service at round resolution.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreFlush {
    /// Participant the points belong to.
    pub player_id: String,
    /// Points accrued since the previous successful flush.
    pub points: u64,
}

/// Success/data envelope the API wraps every response in.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
}

/// Payload of the question list endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct QuestionList {
    pub questions: Vec<crate::state::session::Question>,
}
