//! Reporters push job outcomes to GitHub.
//!
//! Reporting is best effort: every failure is logged and turned into a
//! [`ReportOutcome`], never into an error the caller has to handle.

use crate::credentials::{CredentialPool, RateLimit};
use crate::formatters::{Formatter, formatter_for};
use crate::github::{CommitState, CommitStatus, GithubClient, NotifyError};
use async_trait::async_trait;
use beacon_core::interpolation::mask_secrets;
use beacon_core::job::{Job, JobStatus};
use beacon_core::reporting::{ReporterKind, ReporterSettings};
use beacon_core::secrets::SecretValue;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one report request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    Skipped(&'static str),
    Failed(String),
}

impl ReportOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ReportOutcome::Sent)
    }
}

#[async_trait]
pub trait Reporter: Send + Sync {
    fn name(&self) -> &str;

    async fn report(&self, job: &Job) -> ReportOutcome;
}

/// Human-readable commit status description.
pub fn status_description(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "Build queued",
        JobStatus::Running => "Build started",
        JobStatus::Success => "Build succeeded",
        JobStatus::Failure => "Build failed",
        JobStatus::Exception => "Build errored",
        JobStatus::Cancelled => "Build cancelled",
    }
}

/// Build the reporter described by `settings` for project repository `repo`.
/// `masked` lists secret values that must never appear in comment text.
pub fn create_reporter(
    settings: &ReporterSettings,
    repo: &str,
    client: Arc<GithubClient>,
    masked: &[String],
) -> Arc<dyn Reporter> {
    match settings.kind {
        ReporterKind::Status => Arc::new(StatusReporter::new(settings.clone(), repo, client)),
        ReporterKind::Comment => Arc::new(
            CommentReporter::new(settings.clone(), repo, client).with_masked(masked.to_vec()),
        ),
    }
}

/// One commit status per (revision, builder).
pub struct StatusReporter {
    settings: ReporterSettings,
    repo: String,
    client: Arc<GithubClient>,
    pool: CredentialPool,
    job_url: Option<String>,
}

impl StatusReporter {
    pub fn new(settings: ReporterSettings, repo: impl Into<String>, client: Arc<GithubClient>) -> Self {
        let pool = CredentialPool::new(settings.tokens.clone(), settings.low_water);
        Self {
            settings,
            repo: repo.into(),
            client,
            pool,
            job_url: None,
        }
    }

    /// Link each status to `<base>/api/v1/jobs/<id>`.
    pub fn with_job_url(mut self, base: impl Into<String>) -> Self {
        self.job_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    fn status_for(&self, job: &Job) -> CommitStatus {
        CommitStatus {
            state: CommitState::from(job.status),
            description: status_description(job.status).to_string(),
            target_url: self
                .job_url
                .as_ref()
                .map(|base| format!("{}/api/v1/jobs/{}", base, job.id)),
            context: format!("{} / {}", self.settings.context, job.builder),
        }
    }
}

#[async_trait]
impl Reporter for StatusReporter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn report(&self, job: &Job) -> ReportOutcome {
        if !self.settings.accepts(job) {
            return ReportOutcome::Skipped("filtered");
        }
        let Some(sha) = job.change.revision.as_deref() else {
            debug!(reporter = %self.settings.name, job_id = %job.id, "No revision to attach a status to");
            return ReportOutcome::Skipped("no revision");
        };

        let status = self.status_for(job);
        let status = &status;
        let client = &self.client;
        let repo = self.repo.as_str();
        let result = with_rotation(&self.pool, |token| async move {
            client.post_status(&token, repo, sha, status).await
        })
        .await;

        outcome(&self.settings, job, result)
    }
}

/// Comment on the job's pull request, rendered by a [`Formatter`].
pub struct CommentReporter {
    settings: ReporterSettings,
    repo: String,
    client: Arc<GithubClient>,
    pool: CredentialPool,
    formatter: Box<dyn Formatter>,
    secrets: Vec<String>,
}

impl CommentReporter {
    pub fn new(settings: ReporterSettings, repo: impl Into<String>, client: Arc<GithubClient>) -> Self {
        let pool = CredentialPool::new(settings.tokens.clone(), settings.low_water);
        let formatter = formatter_for(settings.formatter);
        Self {
            settings,
            repo: repo.into(),
            client,
            pool,
            formatter,
            secrets: Vec::new(),
        }
    }

    pub fn with_formatter(mut self, formatter: Box<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Extra values to mask in comment bodies, on top of this reporter's tokens.
    pub fn with_masked(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Post one comment covering `jobs`, all on pull request `number`.
    pub async fn report_batch(&self, number: u64, jobs: &[Job]) -> ReportOutcome {
        let jobs: Vec<Job> = jobs.iter().filter(|j| self.settings.accepts(j)).cloned().collect();
        let Some(first) = jobs.first() else {
            return ReportOutcome::Skipped("filtered");
        };

        let body = mask_secrets(
            &self.formatter.format(&jobs),
            self.settings
                .secret_values()
                .chain(self.secrets.iter().map(String::as_str)),
        );
        let client = &self.client;
        let repo = self.repo.as_str();
        let body = body.as_str();
        let result = with_rotation(&self.pool, |token| async move {
            client.post_comment(&token, repo, number, body).await
        })
        .await;

        outcome(&self.settings, first, result)
    }
}

#[async_trait]
impl Reporter for CommentReporter {
    fn name(&self) -> &str {
        &self.settings.name
    }

    async fn report(&self, job: &Job) -> ReportOutcome {
        let Some(number) = job.change.pull_request else {
            if self.settings.accepts(job) {
                debug!(reporter = %self.settings.name, job_id = %job.id, "Job is not tied to a pull request");
                return ReportOutcome::Skipped("no pull request");
            }
            return ReportOutcome::Skipped("filtered");
        };
        self.report_batch(number, std::slice::from_ref(job)).await
    }
}

/// Run `call` with the pool's current token. When the API reports the
/// quota exhausted, record it and retry once with the next token.
async fn with_rotation<F, Fut>(pool: &CredentialPool, call: F) -> Result<(), NotifyError>
where
    F: Fn(SecretValue) -> Fut,
    Fut: Future<Output = Result<Option<RateLimit>, NotifyError>>,
{
    let credential = pool.select().ok_or(NotifyError::NoCredentials)?;
    match call(credential.token).await {
        Ok(limit) => {
            if let Some(limit) = limit {
                pool.observe(credential.index, limit);
            }
            Ok(())
        }
        Err(NotifyError::RateLimited) => {
            pool.observe(credential.index, RateLimit::exhausted());
            let retry = pool.select().ok_or(NotifyError::NoCredentials)?;
            if retry.index == credential.index {
                return Err(NotifyError::RateLimited);
            }
            warn!(
                from = credential.index,
                to = retry.index,
                "Credential rate limited, retrying with next token"
            );
            if let Some(limit) = call(retry.token).await? {
                pool.observe(retry.index, limit);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn outcome(settings: &ReporterSettings, job: &Job, result: Result<(), NotifyError>) -> ReportOutcome {
    match result {
        Ok(()) => {
            debug!(reporter = %settings.name, job_id = %job.id, status = %job.status, "Report sent");
            ReportOutcome::Sent
        }
        Err(e) => {
            let message = mask_secrets(&e.to_string(), settings.secret_values());
            warn!(
                reporter = %settings.name,
                job_id = %job.id,
                builder = %job.builder,
                error = %message,
                "Report failed"
            );
            ReportOutcome::Failed(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::change::{Category, ChangeEvent};
    use beacon_core::job::TriggerKind;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(status: JobStatus) -> Job {
        let change = ChangeEvent::new("arrow", Category::Pull)
            .with_revision("abc123")
            .with_pull_request(42);
        let mut job = Job::new("C++ w1 ubuntu", "cpp", TriggerKind::Change, change, BTreeMap::new());
        job.status = status;
        job
    }

    fn client(server: &MockServer) -> Arc<GithubClient> {
        Arc::new(GithubClient::new(server.uri(), Duration::from_secs(5)))
    }

    fn settings(kind: ReporterKind, tokens: &[&str]) -> ReporterSettings {
        ReporterSettings::new(
            "github",
            kind,
            tokens.iter().map(|t| SecretValue::new(*t)).collect(),
        )
    }

    #[tokio::test]
    async fn test_report_on_filter_controls_outward_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/apache/arrow/statuses/abc123"))
            .and(body_partial_json(serde_json::json!({
                "state": "failure",
                "description": "Build failed",
                "context": "beacon / C++ w1 ubuntu"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = StatusReporter::new(
            settings(ReporterKind::Status, &["t"])
                .with_report_on([JobStatus::Failure, JobStatus::Success]),
            "apache/arrow",
            client(&server),
        );

        assert_eq!(reporter.report(&job(JobStatus::Cancelled)).await, ReportOutcome::Skipped("filtered"));
        assert_eq!(reporter.report(&job(JobStatus::Failure)).await, ReportOutcome::Sent);
    }

    #[tokio::test]
    async fn test_rotates_when_quota_drops_below_low_water() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(201).insert_header("x-ratelimit-remaining", "900"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer second"))
            .respond_with(ResponseTemplate::new(201).insert_header("x-ratelimit-remaining", "4000"))
            .expect(2)
            .mount(&server)
            .await;

        let reporter = StatusReporter::new(
            settings(ReporterKind::Status, &["first", "second"]),
            "apache/arrow",
            client(&server),
        );

        for _ in 0..3 {
            assert!(reporter.report(&job(JobStatus::Success)).await.is_sent());
        }
        assert_eq!(reporter.pool().remaining(0), Some(900));
        assert_eq!(reporter.pool().remaining(1), Some(4000));
    }

    #[tokio::test]
    async fn test_rate_limited_call_retries_with_next_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer second"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = StatusReporter::new(
            settings(ReporterKind::Status, &["first", "second"]),
            "apache/arrow",
            client(&server),
        );
        assert!(reporter.report(&job(JobStatus::Failure)).await.is_sent());
    }

    #[tokio::test]
    async fn test_failure_is_an_outcome_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let reporter = StatusReporter::new(
            settings(ReporterKind::Status, &["t"]),
            "apache/arrow",
            client(&server),
        );
        match reporter.report(&job(JobStatus::Exception)).await {
            ReportOutcome::Failed(message) => assert!(message.contains("500")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_comment_masks_secrets() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/apache/arrow/issues/42/comments"))
            .and(body_string_contains("***"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let reporter = CommentReporter::new(
            settings(ReporterKind::Comment, &["ghp_secret"]),
            "apache/arrow",
            client(&server),
        )
        .with_masked(vec!["hunter2".into()]);

        let mut job = job(JobStatus::Failure);
        job.summary = Some("login with ghp_secret / hunter2 failed".into());
        assert!(reporter.report(&job).await.is_sent());

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        assert!(!body.contains("ghp_secret"));
        assert!(!body.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_comment_needs_pull_request() {
        let server = MockServer::start().await;
        let reporter = CommentReporter::new(
            settings(ReporterKind::Comment, &["t"]),
            "apache/arrow",
            client(&server),
        );

        let mut job = job(JobStatus::Success);
        job.change.pull_request = None;
        assert_eq!(reporter.report(&job).await, ReportOutcome::Skipped("no pull request"));
    }

    #[tokio::test]
    async fn test_no_credentials_fails_softly() {
        let server = MockServer::start().await;
        let reporter = create_reporter(
            &settings(ReporterKind::Status, &[]),
            "apache/arrow",
            client(&server),
            &[],
        );
        assert!(matches!(
            reporter.report(&job(JobStatus::Success)).await,
            ReportOutcome::Failed(_)
        ));
    }
}
