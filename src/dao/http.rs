//! HTTP implementation of [`QuizApi`] backed by the external REST service.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::state::session::Question;

use super::{
    DaoError, DaoResult, QuizApi,
    models::{ApiEnvelope, QuestionList, ResolvedIdentity, ScoreFlush},
};

/// Cap on how long any single API round trip may take.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reqwest-backed client for the identity, question, and leaderboard endpoints.
#[derive(Debug, Clone)]
pub struct HttpQuizApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuizApi {
    /// Build a client for the API rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl QuizApi for HttpQuizApi {
    fn fetch_questions(&self) -> BoxFuture<'static, DaoResult<Vec<Question>>> {
        let client = self.client.clone();
        let url = self.endpoint("modes/unlimited");
        Box::pin(async move {
            debug!(%url, "fetching question list");
            let envelope: ApiEnvelope<QuestionList> = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            match envelope.data {
                Some(list) if envelope.success => Ok(list.questions),
                _ => Err(DaoError::Rejected("question list unavailable".into())),
            }
        })
    }

    fn resolve_identity(&self, token: String) -> BoxFuture<'static, DaoResult<ResolvedIdentity>> {
        let client = self.client.clone();
        let url = self.endpoint("auth/me");
        Box::pin(async move {
            debug!(%url, "resolving identity");
            let envelope: ApiEnvelope<ResolvedIdentity> = client
                .get(&url)
                .bearer_auth(token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            match envelope.data {
                Some(identity) if envelope.success => Ok(identity),
                _ => Err(DaoError::Rejected("identity not recognized".into())),
            }
        })
    }

    fn flush_score(&self, report: ScoreFlush) -> BoxFuture<'static, DaoResult<()>> {
        let client = self.client.clone();
        let url = self.endpoint("scores/flush");
        Box::pin(async move {
            debug!(%url, player_id = %report.player_id, points = report.points, "flushing session score");
            let response = client
                .post(&url)
                .json(&report)
                .send()
                .await?
                .error_for_status()?;
            let envelope: ApiEnvelope<serde_json::Value> = response.json().await?;
            if envelope.success {
                Ok(())
            } else {
                Err(DaoError::Rejected("score flush refused".into()))
            }
        })
    }
}
