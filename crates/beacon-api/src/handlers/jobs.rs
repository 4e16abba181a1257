//! Job handlers: inspection, cancellation and execution engine callbacks.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use beacon_core::ids::JobId;
use beacon_core::job::{Job, JobOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::rejection;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListJobsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub builder: Option<String>,
}

fn default_limit() -> usize {
    20
}

#[derive(Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub total: usize,
}

/// Identifiers of jobs created by one request.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub jobs: Vec<JobId>,
}

fn parse_id(id: &str) -> Result<JobId, (StatusCode, String)> {
    id.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid job ID".to_string()))
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, (StatusCode, String)> {
    let store = state.dispatcher.store();
    let jobs = match &params.builder {
        Some(builder) => store.list_by_builder(builder, params.limit).await,
        None => store.list_recent(params.limit).await,
    }
    .map_err(rejection)?;

    Ok(Json(ListJobsResponse {
        total: jobs.len(),
        jobs,
    }))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let id = parse_id(&id)?;
    state
        .dispatcher
        .store()
        .get(id)
        .await
        .map_err(rejection)?
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Job not found".to_string()))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let id = parse_id(&id)?;
    state.dispatcher.cancel(id).await.map(Json).map_err(rejection)
}

/// Engine callback: the job began executing.
pub async fn job_started(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let id = parse_id(&id)?;
    state.dispatcher.job_started(id).await.map(Json).map_err(rejection)
}

/// Engine callback: the job reached a terminal status.
pub async fn complete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(outcome): Json<JobOutcome>,
) -> Result<Json<Job>, (StatusCode, String)> {
    let id = parse_id(&id)?;
    if !outcome.status.is_terminal() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Completion status must be terminal, got {}", outcome.status),
        ));
    }
    state
        .dispatcher
        .job_completed(id, outcome)
        .await
        .map(Json)
        .map_err(rejection)
}

#[derive(Serialize)]
pub struct QueueResponse {
    pub depth: usize,
}

pub async fn queue(State(state): State<Arc<AppState>>) -> Json<QueueResponse> {
    Json(QueueResponse {
        depth: state.dispatcher.queue_depth().await,
    })
}
