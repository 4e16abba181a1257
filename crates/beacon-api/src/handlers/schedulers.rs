//! Scheduler handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use beacon_scheduler::ForceRequest;
use serde::Serialize;
use std::sync::Arc;

use super::jobs::QueuedResponse;
use super::rejection;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SchedulerResponse {
    pub name: String,
    pub kind: String,
    pub builders: Vec<String>,
}

pub async fn list_schedulers(State(state): State<Arc<AppState>>) -> Json<Vec<SchedulerResponse>> {
    Json(
        state
            .project()
            .schedulers()
            .iter()
            .map(|s| SchedulerResponse {
                name: s.name.clone(),
                kind: s.kind.as_str().to_string(),
                builders: s.builders.clone(),
            })
            .collect(),
    )
}

/// Trigger every builder of a scheduler now, whatever its kind.
pub async fn force_scheduler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<ForceRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), (StatusCode, String)> {
    let jobs = state.dispatcher.force(&name, request).await.map_err(rejection)?;
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { jobs })))
}
