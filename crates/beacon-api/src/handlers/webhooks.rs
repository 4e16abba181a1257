//! GitHub webhook handler.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use beacon_core::change::Category;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::jobs::QueuedResponse;
use super::rejection;
use crate::state::AppState;
use crate::webhook::{
    DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER, WebhookContext, normalize, verify_signature,
};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub async fn github(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<QueuedResponse>), (StatusCode, String)> {
    let project = state.project().clone();
    if !project.enable.webhooks {
        return Err((StatusCode::NOT_FOUND, "Webhooks are disabled".to_string()));
    }

    if let Some(secret) = &project.webhook_secret {
        let valid = header(&headers, SIGNATURE_HEADER)
            .is_some_and(|signature| verify_signature(secret.expose(), &body, signature));
        if !valid {
            warn!("Rejected webhook with missing or invalid signature");
            return Err(rejection(beacon_core::Error::InvalidSignature));
        }
    }

    let event = header(&headers, EVENT_HEADER)
        .ok_or((StatusCode::BAD_REQUEST, "Missing X-GitHub-Event header".to_string()))?;
    let delivery = header(&headers, DELIVERY_HEADER).unwrap_or("-");

    let ctx = WebhookContext {
        project: &project.name,
        repo: &project.repo,
        bot_handle: &project.bot_handle,
    };
    let Some(mut change) = normalize(event, &body, &ctx).map_err(rejection)? else {
        debug!(event, delivery, "Webhook carries nothing to build");
        return Ok((StatusCode::OK, Json(QueuedResponse { jobs: vec![] })));
    };

    if change.category == Category::Pull && change.files.is_empty() {
        if let (Some(number), Some(files)) = (change.pull_request, &state.changed_files) {
            match files.pull_request_files(&project.repo, number).await {
                Ok(paths) => change.files.extend(paths),
                Err(e) => warn!(pull_request = number, error = %e, "Could not list pull request files"),
            }
        }
    }

    let jobs = state
        .dispatcher
        .handle_change(change)
        .await
        .map_err(rejection)?;
    info!(event, delivery, jobs = jobs.len(), "Webhook processed");

    Ok((StatusCode::ACCEPTED, Json(QueuedResponse { jobs })))
}
