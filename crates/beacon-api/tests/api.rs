//! Route tests for the Beacon API.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use beacon_api::{AppState, create_router};
use beacon_core::ports::{ChangedFiles, ExecutionEngine, JobAssignment};
use beacon_core::secrets::SecretValue;
use beacon_scheduler::bus::LocalEventBus;
use beacon_scheduler::store::MemoryJobStore;
use beacon_scheduler::{Dispatcher, ProjectConfig, assemble};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const PROJECT: &str = r#"
name: arrow
repo: apache/arrow
bot_handle: ursabot
workers:
  - name: w1
    max_builds: 4
environments:
  - name: ubuntu-cpp
    tags: [cpp]
    image: { repository: beacon/cpp }
templates:
  - name: C++
    tags: [cpp]
    steps:
      - name: build
        command: [make, "REV=${{ props.revision }}"]
schedulers:
  - name: cpp
    kind: reactive
    matcher: { paths: ["cpp/*"] }
    builders: [C++]
  - name: manual
    kind: manual
    builders: [C++]
server:
  webhook_secret: WEBHOOK_SECRET
"#;

const SECRET: &str = "hook-secret";
const BUILDER_PATH: &str = "C%2B%2B%20w1%20ubuntu-cpp";

#[derive(Default)]
struct RecordingEngine {
    started: Mutex<Vec<JobAssignment>>,
}

#[async_trait]
impl ExecutionEngine for RecordingEngine {
    async fn start(&self, assignment: &JobAssignment, _endpoint: Option<&str>) -> beacon_core::Result<()> {
        self.started.lock().unwrap().push(assignment.clone());
        Ok(())
    }
}

struct FixedFiles(Vec<String>);

#[async_trait]
impl ChangedFiles for FixedFiles {
    async fn pull_request_files(&self, _repo: &str, _number: u64) -> beacon_core::Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

fn app(files: &[&str]) -> (Router, Arc<RecordingEngine>) {
    let config = ProjectConfig::from_yaml(PROJECT).unwrap();
    let secrets: BTreeMap<String, SecretValue> =
        [("WEBHOOK_SECRET".to_string(), SecretValue::new(SECRET))].into();
    let project = Arc::new(assemble(config, &secrets).unwrap());

    let engine = Arc::new(RecordingEngine::default());
    let dispatcher = Arc::new(Dispatcher::new(
        project,
        Arc::new(MemoryJobStore::new()),
        Arc::new(LocalEventBus::new()),
        engine.clone(),
    ));
    let state = AppState::new(dispatcher)
        .with_changed_files(Arc::new(FixedFiles(files.iter().map(|f| f.to_string()).collect())));

    (create_router(Arc::new(state)), engine)
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn webhook(event: &str, payload: &Value, signature: Option<String>) -> Request<Body> {
    let body = payload.to_string();
    let signature = signature.unwrap_or_else(|| sign(body.as_bytes()));
    Request::builder()
        .method("POST")
        .uri("/webhooks/github")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-hub-signature-256", signature)
        .body(Body::from(body))
        .unwrap()
}

fn post_json(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn push(files: &[&str]) -> Value {
    json!({
        "ref": "refs/heads/master",
        "after": "abc123",
        "repository": { "full_name": "apache/arrow" },
        "commits": [{ "modified": files }]
    })
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app(&[]);
    let (status, json) = call(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["project"], "arrow");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_webhook_signature_is_enforced() {
    let (app, engine) = app(&[]);

    let (status, _) = call(&app, webhook("push", &push(&["cpp/a.cc"]), Some("sha256=00".into()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(engine.started.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_push_webhook_dispatches_matching_builder() {
    let (app, engine) = app(&[]);

    let (status, json) = call(&app, webhook("push", &push(&["cpp/src/a.cc"]), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["jobs"].as_array().unwrap().len(), 1);

    let started = engine.started.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].builder, "C++ w1 ubuntu-cpp");
    assert_eq!(started[0].steps[0].command, vec!["make", "REV=abc123"]);

    // Redelivery of the same push is absorbed.
    let (_, json) = call(&app, webhook("push", &push(&["cpp/src/a.cc"]), None)).await;
    assert!(json["jobs"].as_array().unwrap().is_empty());

    let (_, json) = call(&app, webhook("push", &push(&["docs/index.rst"]), None)).await;
    assert!(json["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pull_request_files_are_fetched() {
    let (app, engine) = app(&["cpp/src/arrow/array.cc"]);
    let payload = json!({
        "action": "opened",
        "number": 12,
        "repository": { "full_name": "apache/arrow" },
        "pull_request": {
            "head": { "ref": "feature", "sha": "def456" },
            "base": { "ref": "master", "sha": "abc123" },
            "user": { "login": "contributor" }
        }
    });

    let (status, _) = call(&app, webhook("pull_request", &payload, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let started = engine.started.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].branch.as_deref(), Some("refs/pull/12/merge"));
}

#[tokio::test]
async fn test_ping_is_acknowledged() {
    let (app, _) = app(&[]);
    let (status, json) = call(&app, webhook("ping", &json!({ "zen": "hi" }), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_force_builder_and_engine_callbacks() {
    let (app, engine) = app(&[]);

    let (status, json) = call(
        &app,
        post_json(
            &format!("/api/v1/builders/{BUILDER_PATH}/force"),
            json!({ "revision": "f00", "reason": "operator" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = json["jobs"][0].as_str().unwrap().to_string();
    assert_eq!(engine.started.lock().unwrap()[0].properties["reason"], "operator");

    let (status, job) = call(&app, get(&format!("/api/v1/jobs/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "running");

    let (status, _) = call(&app, post_json(&format!("/api/v1/jobs/{id}/started"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let outcome = json!({ "status": "success", "outputs": { "wheel": "pyarrow.whl" } });
    let (status, job) = call(&app, post_json(&format!("/api/v1/jobs/{id}/complete"), outcome.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "success");
    assert_eq!(job["outputs"]["wheel"], "pyarrow.whl");

    let (status, _) = call(&app, post_json(&format!("/api/v1/jobs/{id}/complete"), outcome)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, post_json(&format!("/api/v1/jobs/{id}/cancel"), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_force_scheduler_and_listing() {
    let (app, _) = app(&[]);

    let (status, json) = call(&app, post_json("/api/v1/schedulers/manual/force", json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["jobs"].as_array().unwrap().len(), 1);

    let (_, jobs) = call(&app, get("/api/v1/jobs?limit=5")).await;
    assert_eq!(jobs["total"], 1);
    assert_eq!(jobs["jobs"][0]["scheduler"], "manual");

    let (_, builders) = call(&app, get("/api/v1/builders")).await;
    assert_eq!(builders[0]["name"], "C++ w1 ubuntu-cpp");
    assert_eq!(builders[0]["image"], "beacon/cpp:latest");

    let (_, schedulers) = call(&app, get("/api/v1/schedulers")).await;
    assert_eq!(schedulers.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_lookup_errors() {
    let (app, _) = app(&[]);

    let (status, _) = call(&app, post_json("/api/v1/schedulers/nope/force", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, get("/api/v1/jobs/not-an-id")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        post_json(&format!("/api/v1/jobs/{}/cancel", beacon_core::ids::JobId::new()), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
