//! Minimal GitHub REST client.

use crate::credentials::RateLimit;
use async_trait::async_trait;
use beacon_core::job::JobStatus;
use beacon_core::ports::ChangedFiles;
use beacon_core::secrets::SecretValue;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("beacon-ci/", env!("CARGO_PKG_VERSION"));
const FILES_PER_PAGE: usize = 100;
/// GitHub stops listing pull request files after 3000 entries.
const MAX_FILE_PAGES: usize = 30;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("GitHub API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("GitHub API rate limit exhausted")]
    RateLimited,
    #[error("No credentials configured")]
    NoCredentials,
}

/// Commit status states accepted by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl From<JobStatus> for CommitState {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::Running => CommitState::Pending,
            JobStatus::Success => CommitState::Success,
            JobStatus::Failure => CommitState::Failure,
            JobStatus::Exception | JobStatus::Cancelled => CommitState::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitStatus {
    pub state: CommitState,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub context: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
}

/// GitHub API client. Tokens are passed per call so that reporters can
/// rotate them; `token` is only used for read calls made on behalf of the
/// webhook surface.
#[derive(Debug, Clone)]
pub struct GithubClient {
    base_url: String,
    token: Option<SecretValue>,
    client: reqwest::Client,
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    pub fn with_token(mut self, token: SecretValue) -> Self {
        self.token = Some(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a commit status on `sha`.
    pub async fn post_status(
        &self,
        token: &SecretValue,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<Option<RateLimit>, NotifyError> {
        let url = format!("{}/repos/{}/statuses/{}", self.base_url, repo, sha);
        debug!(repo, sha, context = %status.context, state = ?status.state, "Posting commit status");
        let response = self.send(self.authorized(self.client.post(&url), Some(token)).json(status)).await?;
        Ok(rate_limit(response.headers()))
    }

    /// Add a comment to pull request (issue) `number`.
    pub async fn post_comment(
        &self,
        token: &SecretValue,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<Option<RateLimit>, NotifyError> {
        let url = format!("{}/repos/{}/issues/{}/comments", self.base_url, repo, number);
        debug!(repo, number, "Posting pull request comment");
        let request = self
            .authorized(self.client.post(&url), Some(token))
            .json(&serde_json::json!({ "body": body }));
        let response = self.send(request).await?;
        Ok(rate_limit(response.headers()))
    }

    /// Every file touched by pull request `number`.
    pub async fn list_pull_request_files(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<Vec<String>, NotifyError> {
        let url = format!("{}/repos/{}/pulls/{}/files", self.base_url, repo, number);
        let mut files = Vec::new();

        for page in 1..=MAX_FILE_PAGES {
            let request = self
                .authorized(self.client.get(&url), self.token.as_ref())
                .query(&[("per_page", FILES_PER_PAGE), ("page", page)]);
            let response = self.send(request).await?;
            let batch: Vec<PullRequestFile> = serde_json::from_slice(&response.bytes().await?)?;
            let last = batch.len() < FILES_PER_PAGE;
            files.extend(batch.into_iter().map(|f| f.filename));
            if last {
                break;
            }
        }

        debug!(repo, number, files = files.len(), "Fetched pull request files");
        Ok(files)
    }

    fn authorized(&self, request: RequestBuilder, token: Option<&SecretValue>) -> RequestBuilder {
        let request = request
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match token {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, NotifyError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if is_rate_limited(status, response.headers()) {
            return Err(NotifyError::RateLimited);
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChangedFiles for GithubClient {
    async fn pull_request_files(&self, repo: &str, number: u64) -> beacon_core::Result<Vec<String>> {
        self.list_pull_request_files(repo, number)
            .await
            .map_err(|e| beacon_core::Error::Network(e.to_string()))
    }
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    match status {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => rate_limit(headers).is_some_and(|limit| limit.remaining == 0),
        _ => false,
    }
}

/// Read the `x-ratelimit-*` headers, if the response carries them.
pub fn rate_limit(headers: &HeaderMap) -> Option<RateLimit> {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    let remaining = number("x-ratelimit-remaining")?;
    Some(RateLimit {
        remaining: u32::try_from(remaining.max(0)).unwrap_or(u32::MAX),
        limit: number("x-ratelimit-limit").and_then(|v| u32::try_from(v).ok()),
        reset: number("x-ratelimit-reset").and_then(|v| DateTime::<Utc>::from_timestamp(v, 0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GithubClient {
        GithubClient::new(server.uri(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_post_status_reads_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/apache/arrow/statuses/abc123"))
            .and(header("authorization", "Bearer t0ken"))
            .and(body_partial_json(serde_json::json!({
                "state": "failure",
                "context": "beacon / C++ w1 ubuntu"
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-ratelimit-remaining", "4321")
                    .insert_header("x-ratelimit-limit", "5000")
                    .insert_header("x-ratelimit-reset", "1700000000"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let status = CommitStatus {
            state: CommitState::Failure,
            description: "Build failed".into(),
            target_url: None,
            context: "beacon / C++ w1 ubuntu".into(),
        };
        let limit = client(&server)
            .post_status(&SecretValue::new("t0ken"), "apache/arrow", "abc123", &status)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(limit.remaining, 4321);
        assert_eq!(limit.limit, Some(5000));
        assert_eq!(limit.reset.map(|r| r.timestamp()), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .set_body_string("API rate limit exceeded"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .post_comment(&SecretValue::new("t"), "apache/arrow", 7, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::RateLimited));
    }

    #[tokio::test]
    async fn test_api_rejection_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("No commit found for SHA"))
            .mount(&server)
            .await;

        let status = CommitStatus {
            state: CommitState::Success,
            description: "Build succeeded".into(),
            target_url: None,
            context: "beacon / x".into(),
        };
        let err = client(&server)
            .post_status(&SecretValue::new("t"), "apache/arrow", "nope", &status)
            .await
            .unwrap_err();
        match err {
            NotifyError::Api { status, body } => {
                assert_eq!(status, 422);
                assert!(body.contains("No commit"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_pull_request_files_paginates() {
        let server = MockServer::start().await;
        let first: Vec<_> = (0..100)
            .map(|i| serde_json::json!({ "filename": format!("cpp/src/f{i}.cc") }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/repos/apache/arrow/pulls/12/files"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/apache/arrow/pulls/12/files"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "filename": "python/setup.py" }])),
            )
            .mount(&server)
            .await;

        let files = client(&server)
            .with_token(SecretValue::new("t"))
            .pull_request_files("apache/arrow", 12)
            .await
            .unwrap();

        assert_eq!(files.len(), 101);
        assert_eq!(files.last().map(String::as_str), Some("python/setup.py"));
    }

    #[test]
    fn test_job_status_maps_to_commit_state() {
        assert_eq!(CommitState::from(JobStatus::Running), CommitState::Pending);
        assert_eq!(CommitState::from(JobStatus::Exception), CommitState::Error);
        assert_eq!(CommitState::from(JobStatus::Cancelled), CommitState::Error);
        assert_eq!(CommitState::from(JobStatus::Success), CommitState::Success);
    }
}
