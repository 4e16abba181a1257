//! Test helper functions and utilities.

use crate::fixtures::{ProjectFixture, WEBHOOK_SECRET};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use beacon_api::webhook::{EVENT_HEADER, SIGNATURE_HEADER};
use beacon_api::{AppState, create_router};
use beacon_core::ports::{ChangedFiles, EventBus, ExecutionEngine, JobAssignment, JobStore};
use beacon_scheduler::bus::LocalEventBus;
use beacon_scheduler::store::MemoryJobStore;
use beacon_scheduler::{Dispatcher, Project};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower::ServiceExt;

/// Execution engine that records assignments instead of running them.
#[derive(Default)]
pub struct RecordingEngine {
    started: Mutex<Vec<JobAssignment>>,
}

impl RecordingEngine {
    pub fn assignments(&self) -> Vec<JobAssignment> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.started.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionEngine for RecordingEngine {
    async fn start(&self, assignment: &JobAssignment, _endpoint: Option<&str>) -> beacon_core::Result<()> {
        if let Ok(mut started) = self.started.lock() {
            started.push(assignment.clone());
        }
        Ok(())
    }
}

/// A dispatcher over in-memory adapters plus handles on each of them.
pub struct TestHarness {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn JobStore>,
    pub bus: Arc<dyn EventBus>,
    pub engine: Arc<RecordingEngine>,
}

impl TestHarness {
    /// Harness over the fixture project.
    pub fn new() -> Self {
        Self::with_project(ProjectFixture::arrow())
    }

    pub fn with_project(project: Project) -> Self {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());
        let engine = Arc::new(RecordingEngine::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(project),
            store.clone(),
            bus.clone(),
            engine.clone(),
        ));

        Self {
            dispatcher,
            store,
            bus,
            engine,
        }
    }

    /// HTTP surface over this harness's dispatcher.
    pub fn router(&self, changed_files: Option<Arc<dyn ChangedFiles>>) -> Router {
        let mut state = AppState::new(self.dispatcher.clone());
        if let Some(files) = changed_files {
            state = state.with_changed_files(files);
        }
        create_router(Arc::new(state))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// `X-Hub-Signature-256` value for `body` under the fixture webhook secret.
pub fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Signed GitHub webhook request.
pub fn webhook_request(event: &str, payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header(EVENT_HEADER, event)
        .header(SIGNATURE_HEADER, sign(body.as_bytes()))
        .body(Body::from(body))
        .expect("Failed to build webhook request")
}

/// JSON POST request.
pub fn post_json(uri: &str, payload: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("Failed to build request")
}

/// Send one request through `router` and decode the JSON response body.
pub async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("Router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Wait for a condition with timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_immediate() {
        let result = wait_for(Duration::from_secs(1), Duration::from_millis(10), || async {
            true
        })
        .await;
        assert!(result);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let result = wait_for(Duration::from_millis(100), Duration::from_millis(10), || async {
            false
        })
        .await;
        assert!(!result);
    }

    #[tokio::test]
    async fn test_harness_starts_forced_builds() {
        let harness = TestHarness::new();
        let id = harness
            .dispatcher
            .force_builder(crate::fixtures::CPP_URSA_1, Default::default())
            .await
            .unwrap();

        let assignments = harness.engine.assignments();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].job_id, id);
        assert_eq!(assignments[0].steps[0].command, vec!["ninja", "-C", "build"]);
    }
}
