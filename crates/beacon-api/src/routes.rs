//! API route definitions.

use axum::{
    Router, middleware,
    routing::{get, post},
};
use beacon_core::{Error, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{builders, health, jobs, schedulers, webhooks};
use crate::middleware::request_id;
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", api_routes())
        .route("/webhooks/github", post(webhooks::github))
        .route("/health", get(health::health))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/jobs", job_routes())
        .nest("/schedulers", scheduler_routes())
        .nest("/builders", builder_routes())
        .route("/queue", get(jobs::queue))
}

fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/started", post(jobs::job_started))
        .route("/{id}/complete", post(jobs::complete_job))
}

fn scheduler_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(schedulers::list_schedulers))
        .route("/{name}/force", post(schedulers::force_scheduler))
}

fn builder_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(builders::list_builders))
        .route("/{name}/force", post(builders::force_builder))
}

/// Serve `router` on `bind` until `shutdown` flips to `true`.
pub async fn serve(router: Router, bind: &str, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(address = %bind, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| Error::Network(e.to_string()))
}
