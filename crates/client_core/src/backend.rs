use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use shared::domain::{QuestionId, QuestionRow, UserId, VoteRow};
use shared::error::{ApiError, ErrorCode};
use shared::protocol::{NewQuestion, NewVote, QuestionPatch, VoteCountResponse};

use crate::error::BackendError;

/// Authoritative backend boundary. Mutations return the confirmed row
/// so the caller can merge server-assigned ids and timestamps over its
/// optimistic predictions.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_questions(&self) -> Result<Vec<QuestionRow>, BackendError>;

    async fn create_question(&self, new: NewQuestion) -> Result<QuestionRow, BackendError>;

    async fn update_question(
        &self,
        id: QuestionId,
        patch: QuestionPatch,
        actor: UserId,
    ) -> Result<QuestionRow, BackendError>;

    async fn delete_question(&self, id: QuestionId, actor: UserId) -> Result<(), BackendError>;

    async fn insert_vote(&self, new: NewVote) -> Result<VoteRow, BackendError>;

    async fn delete_vote(
        &self,
        question_id: QuestionId,
        voter_id: UserId,
    ) -> Result<(), BackendError>;

    async fn fetch_vote_count(&self, question_id: QuestionId) -> Result<u64, BackendError>;

    async fn fetch_user_vote(
        &self,
        question_id: QuestionId,
        voter_id: UserId,
    ) -> Result<Option<VoteRow>, BackendError>;
}

/// REST implementation of [`Backend`] against the board API.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_questions(&self) -> Result<Vec<QuestionRow>, BackendError> {
        let response = self
            .http
            .get(format!("{}/api/questions", self.base_url))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn create_question(&self, new: NewQuestion) -> Result<QuestionRow, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/questions", self.base_url))
            .json(&new)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn update_question(
        &self,
        id: QuestionId,
        patch: QuestionPatch,
        actor: UserId,
    ) -> Result<QuestionRow, BackendError> {
        let response = self
            .http
            .patch(format!("{}/api/questions/{}", self.base_url, id.0))
            .query(&[("user_id", &actor.0)])
            .json(&patch)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn delete_question(&self, id: QuestionId, actor: UserId) -> Result<(), BackendError> {
        let response = self
            .http
            .delete(format!("{}/api/questions/{}", self.base_url, id.0))
            .query(&[("user_id", &actor.0)])
            .send()
            .await
            .map_err(transport)?;
        expect_no_content(response).await
    }

    async fn insert_vote(&self, new: NewVote) -> Result<VoteRow, BackendError> {
        let response = self
            .http
            .post(format!("{}/api/votes", self.base_url))
            .json(&new)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn delete_vote(
        &self,
        question_id: QuestionId,
        voter_id: UserId,
    ) -> Result<(), BackendError> {
        let response = self
            .http
            .delete(format!("{}/api/votes", self.base_url))
            .query(&[("question_id", &question_id.0), ("user_id", &voter_id.0)])
            .send()
            .await
            .map_err(transport)?;
        expect_no_content(response).await
    }

    async fn fetch_vote_count(&self, question_id: QuestionId) -> Result<u64, BackendError> {
        let response = self
            .http
            .get(format!(
                "{}/api/questions/{}/votes/count",
                self.base_url, question_id.0
            ))
            .send()
            .await
            .map_err(transport)?;
        let counted: VoteCountResponse = decode(response).await?;
        Ok(counted.count)
    }

    async fn fetch_user_vote(
        &self,
        question_id: QuestionId,
        voter_id: UserId,
    ) -> Result<Option<VoteRow>, BackendError> {
        let response = self
            .http
            .get(format!(
                "{}/api/questions/{}/votes/mine",
                self.base_url, question_id.0
            ))
            .query(&[("user_id", &voter_id.0)])
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    BackendError::Transport(err.to_string())
}

/// Map a non-success response to a structured rejection, falling back
/// to a code derived from the status when the body is not an ApiError.
async fn rejection(response: reqwest::Response) -> BackendError {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(api) => BackendError::Rejected(api),
        Err(_) => BackendError::Rejected(ApiError::new(
            code_for_status(status),
            format!("backend returned {status}"),
        )),
    }
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BackendError> {
    if !response.status().is_success() {
        return Err(rejection(response).await);
    }
    response.json().await.map_err(transport)
}

async fn expect_no_content(response: reqwest::Response) -> Result<(), BackendError> {
    if !response.status().is_success() {
        return Err(rejection(response).await);
    }
    Ok(())
}
