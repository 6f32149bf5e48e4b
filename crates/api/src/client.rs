use std::time::Duration;

use {
    reqwest::Client,
    serde_json::json,
    thiserror::Error,
    tracing::debug,
};

use crate::types::{ListMatchesResponse, MatchItem, MatchStatus, Problem};

const API_BASE_PATH: &str = "/services/apexrest/v1";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with an RFC 7807 problem document.
    #[error("{message} (status {status})")]
    Problem { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response (status {status}): {body}")]
    Unexpected { status: u16, body: String },
}

/// Read-mostly client for the duplicate-matches API. Consumes the credential
/// produced by the login flow; never writes it.
pub struct ApiClient {
    base: String,
    token: String,
    client: Client,
}

impl ApiClient {
    pub fn new(instance_url: &str, token: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            base: instance_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        }
    }

    /// Fetch the pending duplicate matches, with both customer records
    /// expanded.
    pub async fn list_pending(&self) -> Result<Vec<MatchItem>, ApiError> {
        let url = format!(
            "{}{API_BASE_PATH}/duplicate-matches?status=pending&expand=customerA,customerB",
            self.base
        );
        debug!(%url, "listing pending duplicate matches");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(problem_from(status.as_u16(), response).await);
        }

        let body: ListMatchesResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Transport(format!("malformed list response: {e}")))?;
        Ok(body.items)
    }

    /// Mark a match as merged or ignored.
    pub async fn resolve(&self, id: &str, status: MatchStatus) -> Result<(), ApiError> {
        let url = format!(
            "{}{API_BASE_PATH}/duplicate-matches/{}",
            self.base,
            urlencoding::encode(id)
        );
        debug!(%url, status = status.as_str(), "resolving duplicate match");

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "status": status }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let http_status = response.status();
        if !http_status.is_success() {
            return Err(problem_from(http_status.as_u16(), response).await);
        }
        Ok(())
    }
}

async fn problem_from(status: u16, response: reqwest::Response) -> ApiError {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<Problem>(&body) {
        Ok(problem) => {
            let mut message = problem.title;
            if let Some(detail) = problem.detail {
                message = format!("{message}: {detail}");
            }
            ApiError::Problem {
                status: problem.status.unwrap_or(status),
                message,
            }
        },
        Err(_) => ApiError::Unexpected {
            status,
            body: body.chars().take(200).collect(),
        },
    }
}
