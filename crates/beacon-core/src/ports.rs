//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external adapters.

use crate::Result;
use crate::builder::RenderedStep;
use crate::events::Event;
use crate::ids::JobId;
use crate::job::Job;
use crate::secrets::SecretValue;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;

/// Stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Event bus for publishing and subscribing to events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to events matching a pattern.
    /// Pattern supports wildcards: `job.*.job_123`, `job.>`
    async fn subscribe(&self, pattern: &str) -> Result<EventStream>;
}

/// Narrow persistence interface for job history.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job record.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Most recent jobs first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>>;

    /// Jobs of one builder, most recent first.
    async fn list_by_builder(&self, builder: &str, limit: usize) -> Result<Vec<Job>>;
}

/// Everything the execution engine needs to run one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAssignment {
    pub job_id: JobId,
    pub builder: String,
    pub worker: String,
    pub image: String,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub steps: Vec<RenderedStep>,
}

/// External build execution engine. Starting is asynchronous: the engine
/// reports back through the dispatcher's started/completed callbacks.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn start(&self, assignment: &JobAssignment, endpoint: Option<&str>) -> Result<()>;
}

/// Resolves credential references named in configuration.
pub trait SecretSource: Send + Sync {
    fn resolve(&self, name: &str) -> Option<SecretValue>;
}

impl SecretSource for BTreeMap<String, SecretValue> {
    fn resolve(&self, name: &str) -> Option<SecretValue> {
        self.get(name).cloned()
    }
}

/// Lists the files touched by a pull request on the source-control host.
#[async_trait]
pub trait ChangedFiles: Send + Sync {
    async fn pull_request_files(&self, repo: &str, number: u64) -> Result<Vec<String>>;
}
