//! Timers driving periodic schedulers.
//!
//! Each periodic scheduler gets its own task. Schedulers that depend on each
//! other (a nightly submit and its later report) are only related by their
//! cadences; nothing here waits for one before firing the other.

use crate::dispatcher::Dispatcher;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Spawn one timer task per periodic scheduler of the dispatcher's project.
/// Tasks exit when `shutdown` flips to `true`.
pub fn spawn_periodic(dispatcher: Arc<Dispatcher>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let names: Vec<String> = dispatcher
        .project()
        .schedulers()
        .iter()
        .filter(|s| s.is_periodic())
        .map(|s| s.name.clone())
        .collect();

    names
        .into_iter()
        .map(|name| tokio::spawn(run_timer(dispatcher.clone(), name, shutdown.clone())))
        .collect()
}

async fn run_timer(dispatcher: Arc<Dispatcher>, name: String, mut shutdown: watch::Receiver<bool>) {
    let Some(cadence) = dispatcher
        .project()
        .scheduler(&name)
        .and_then(|s| s.cadence())
        .cloned()
    else {
        return;
    };

    info!(scheduler = %name, "Periodic timer started");

    loop {
        let now = Utc::now();
        let Some(next) = cadence.next_after(now) else {
            warn!(scheduler = %name, "Cadence has no upcoming fire time; timer stopped");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!(scheduler = %name, next = %next, "Next periodic fire");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match dispatcher.fire_periodic(&name, next).await {
                    Ok(jobs) => info!(scheduler = %name, jobs = jobs.len(), "Periodic jobs queued"),
                    Err(e) => error!(scheduler = %name, error = %e, "Periodic fire failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(scheduler = %name, "Periodic timer stopped");
                    return;
                }
            }
        }
    }
}
