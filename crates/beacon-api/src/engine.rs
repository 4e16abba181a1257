//! Execution engine reached over HTTP.

use async_trait::async_trait;
use beacon_core::ports::{ExecutionEngine, JobAssignment};
use beacon_core::{Error, Result};
use std::time::Duration;
use tracing::debug;

/// Posts each assignment to `<endpoint>/jobs`. The engine reports progress
/// back through the job callbacks of this API.
pub struct HttpExecutionEngine {
    client: reqwest::Client,
    default_endpoint: Option<String>,
}

impl HttpExecutionEngine {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            default_endpoint: None,
        }
    }

    /// Endpoint used for workers that do not declare their own.
    pub fn with_default_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.default_endpoint = Some(endpoint.into());
        self
    }
}

#[async_trait]
impl ExecutionEngine for HttpExecutionEngine {
    async fn start(&self, assignment: &JobAssignment, endpoint: Option<&str>) -> Result<()> {
        let endpoint = endpoint
            .or(self.default_endpoint.as_deref())
            .ok_or_else(|| {
                Error::Execution(format!("worker `{}` has no engine endpoint", assignment.worker))
            })?;
        let url = format!("{}/jobs", endpoint.trim_end_matches('/'));
        debug!(job_id = %assignment.job_id, url = %url, "Submitting job to engine");

        let response = self
            .client
            .post(&url)
            .json(assignment)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Execution(format!("engine returned {}: {}", status, body)));
        }
        Ok(())
    }
}
