//! Reporting service: fans job events out to every reporter.

use crate::github::GithubClient;
use crate::reporter::{ReportOutcome, Reporter, create_reporter};
use beacon_core::Result;
use beacon_core::events::Event;
use beacon_core::job::Job;
use beacon_core::ports::{EventBus, JobStore};
use beacon_core::reporting::ReporterSettings;
use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReportingService {
    reporters: Vec<Arc<dyn Reporter>>,
    timeout: Duration,
    store: Option<Arc<dyn JobStore>>,
}

impl ReportingService {
    pub fn new(reporters: Vec<Arc<dyn Reporter>>) -> Self {
        Self {
            reporters,
            timeout: DEFAULT_REPORT_TIMEOUT,
            store: None,
        }
    }

    /// One reporter per settings entry, all posting to `repo`.
    pub fn from_settings(
        settings: &[ReporterSettings],
        repo: &str,
        client: Arc<GithubClient>,
        masked: &[String],
    ) -> Self {
        Self::new(
            settings
                .iter()
                .map(|s| create_reporter(s, repo, client.clone(), masked))
                .collect(),
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Look started jobs up in `store` so reporters also see the running state.
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Send `job` to every reporter concurrently, each call bounded by the
    /// service timeout.
    pub async fn deliver(&self, job: &Job) -> Vec<ReportOutcome> {
        let calls = self.reporters.iter().map(|reporter| async move {
            match tokio::time::timeout(self.timeout, reporter.report(job)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        reporter = reporter.name(),
                        job_id = %job.id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Report timed out"
                    );
                    ReportOutcome::Failed("timed out".to_string())
                }
            }
        });
        join_all(calls).await
    }

    /// Consume job events until `shutdown` flips to `true`. Events are
    /// handled in order, so a job's running status never lands after its
    /// terminal one.
    pub async fn run(&self, bus: Arc<dyn EventBus>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut events = bus.subscribe("job.>").await?;
        info!(reporters = self.reporters.len(), "Reporting service started");

        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else {
                        debug!("Event stream closed");
                        break;
                    };
                    self.handle(event).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reporting service stopped");
        Ok(())
    }

    async fn handle(&self, event: Event) {
        let job = match event {
            Event::JobCompleted(payload) => payload.job,
            Event::JobStarted(payload) => {
                let Some(store) = &self.store else {
                    return;
                };
                match store.get(payload.job_id).await {
                    Ok(Some(job)) => job,
                    Ok(None) => return,
                    Err(e) => {
                        warn!(job_id = %payload.job_id, error = %e, "Could not load started job");
                        return;
                    }
                }
            }
            _ => return,
        };

        let outcomes = self.deliver(&job).await;
        let sent = outcomes.iter().filter(|o| o.is_sent()).count();
        debug!(job_id = %job.id, status = %job.status, sent, "Job reported");
    }
}
