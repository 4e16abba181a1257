//! The `start` command: wire every component together and run until
//! interrupted.

use beacon_api::{AppState, HttpExecutionEngine, create_router, serve};
use beacon_core::ports::{EventBus, JobStore};
use beacon_notify::{GithubClient, ReportingService};
use beacon_scheduler::bus::LocalEventBus;
use beacon_scheduler::store::MemoryJobStore;
use beacon_scheduler::timer::spawn_periodic;
use beacon_scheduler::{Dispatcher, Project};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub async fn run(project: Project, bind: Option<String>) -> anyhow::Result<()> {
    let project = Arc::new(project);
    let bind = bind.unwrap_or_else(|| project.server.bind.clone());

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let bus: Arc<dyn EventBus> = Arc::new(LocalEventBus::new());
    let engine = Arc::new(HttpExecutionEngine::new(Duration::from_secs(
        project.server.engine_timeout_secs,
    )));
    let dispatcher = Arc::new(Dispatcher::new(project.clone(), store.clone(), bus.clone(), engine));

    let mut github = GithubClient::new(
        project.github.api_url.clone(),
        Duration::from_secs(project.github.timeout_secs),
    );
    if let Some(token) = &project.github_token {
        github = github.with_token(token.clone());
    }
    let github = Arc::new(github);

    let (shutdown_tx, shutdown) = watch::channel(false);
    let mut tasks = Vec::new();

    if project.enable.reporters && !project.reporters.is_empty() {
        let service = ReportingService::from_settings(
            &project.reporters,
            &project.repo,
            github.clone(),
            &project.secret_values(),
        )
        .with_timeout(Duration::from_secs(project.server.report_timeout_secs))
        .with_store(store.clone());
        let bus = bus.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = service.run(bus, shutdown).await {
                error!(error = %e, "Reporting service failed");
            }
        }));
    } else {
        info!("Reporting disabled");
    }

    if project.enable.periodic {
        tasks.extend(spawn_periodic(dispatcher.clone(), shutdown.clone()));
    } else {
        info!("Periodic schedulers disabled");
    }

    let state = AppState::new(dispatcher).with_changed_files(github);
    let router = create_router(Arc::new(state));

    let server = {
        let bind = bind.clone();
        tokio::spawn(async move { serve(router, &bind, shutdown).await })
    };
    info!(project = %project.name, bind = %bind, "Beacon started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("No component was listening for shutdown");
    }

    match server.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
