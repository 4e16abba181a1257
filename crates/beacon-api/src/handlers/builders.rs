//! Builder handlers.

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
pub struct BuilderResponse {
    pub name: String,
    pub template: String,
    pub worker: String,
    pub environment: String,
    pub image: String,
}

pub async fn list_builders(State(state): State<Arc<AppState>>) -> Json<Vec<BuilderResponse>> {
    Json(
        state
            .project()
            .builders()
            .iter()
            .map(|b| BuilderResponse {
                name: b.name.clone(),
                template: b.template.clone(),
                worker: b.worker.clone(),
                environment: b.environment.clone(),
                image: b.image.to_string(),
            })
            .collect(),
    )
}

/// Build one builder now.
pub async fn force_builder(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<ForceRequest>,
) -> Result<(StatusCode, Json<QueuedResponse>), (StatusCode, String)> {
    let job = state
        .dispatcher
        .force_builder(&name, request)
        .await
        .map_err(rejection)?;
    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { jobs: vec![job] })))
}
