//! HTTP client for a running Beacon daemon.

use crate::config::CliConfig;
use beacon_core::job::Job;
use beacon_scheduler::ForceRequest;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("Rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

#[derive(Debug, Deserialize)]
pub struct Queued {
    pub jobs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobList {
    pub jobs: Vec<Job>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &CliConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/api/v1{}", self.base_url, path))
    }

    pub async fn force_builder(&self, builder: &str, request: &ForceRequest) -> Result<Queued, ApiError> {
        let path = format!("/builders/{}/force", encode(builder));
        let response = self.request(Method::POST, &path).json(request).send().await?;
        parse(response, || format!("Builder `{}` not found", builder)).await
    }

    pub async fn force_scheduler(&self, scheduler: &str, request: &ForceRequest) -> Result<Queued, ApiError> {
        let path = format!("/schedulers/{}/force", encode(scheduler));
        let response = self.request(Method::POST, &path).json(request).send().await?;
        parse(response, || format!("Scheduler `{}` not found", scheduler)).await
    }

    pub async fn list_jobs(&self, builder: Option<&str>, limit: usize) -> Result<Vec<Job>, ApiError> {
        let mut request = self
            .request(Method::GET, "/jobs")
            .query(&[("limit", limit.to_string())]);
        if let Some(builder) = builder {
            request = request.query(&[("builder", builder)]);
        }
        let list: JobList = parse(request.send().await?, || "No jobs".to_string()).await?;
        Ok(list.jobs)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job, ApiError> {
        let response = self.request(Method::GET, &format!("/jobs/{}", id)).send().await?;
        parse(response, || format!("Job {} not found", id)).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<Job, ApiError> {
        let response = self
            .request(Method::POST, &format!("/jobs/{}/cancel", id))
            .send()
            .await?;
        parse(response, || format!("Job {} not found", id)).await
    }
}

async fn parse<T: DeserializeOwned>(
    response: Response,
    not_found: impl FnOnce() -> String,
) -> Result<T, ApiError> {
    match response.status() {
        status if status.is_success() => Ok(response.json().await?),
        StatusCode::NOT_FOUND => Err(ApiError::NotFound(not_found())),
        status => Err(ApiError::Rejected {
            status,
            message: response.text().await.unwrap_or_default(),
        }),
    }
}

/// Percent-encode one path segment.
fn encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
