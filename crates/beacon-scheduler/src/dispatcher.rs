//! Dispatch orchestration.
//!
//! The dispatcher turns changes, timer ticks and operator requests into
//! jobs, queues them, hands them to the execution engine as worker slots
//! free up and records every transition.

use crate::project::Project;
use crate::queue::{DispatchQueue, Enqueued};
use crate::schedulers::Scheduler;
use crate::workers::WorkerSlots;
use beacon_core::builder::Builder;
use beacon_core::change::ChangeEvent;
use beacon_core::events::{
    ChangeReceivedPayload, Event, JobCompletedPayload, JobQueuedPayload, JobStartedPayload,
};
use beacon_core::ids::JobId;
use beacon_core::interpolation::PropertyContext;
use beacon_core::job::{Job, JobOutcome, JobStatus, TriggerKind};
use beacon_core::ports::{EventBus, ExecutionEngine, JobAssignment, JobStore};
use beacon_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Scheduler label of jobs forced directly on a builder.
pub const FORCE_BUILDER_SCHEDULER: &str = "force";

const REASON_PROPERTY: &str = "reason";

/// Operator request to build now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForceRequest {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    /// Builds the merge ref of this pull request.
    #[serde(default)]
    pub pull_request: Option<u64>,
    /// Override every other property source.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ForceRequest {
    fn into_change(self, project: &Project) -> ChangeEvent {
        let mut change = ChangeEvent::synthetic(&project.name);
        change.repository = self.repository.or_else(|| project.url.clone());
        change.revision = self.revision;
        change.branch = match self.pull_request {
            Some(number) => Some(format!("refs/pull/{number}/merge")),
            None => self.branch,
        };
        change.pull_request = self.pull_request;
        change.properties = self.properties;
        if let Some(reason) = self.reason {
            change.properties.entry(REASON_PROPERTY.to_string()).or_insert(reason);
        }
        change
    }
}

struct DispatchState {
    queue: DispatchQueue,
    slots: WorkerSlots,
}

pub struct Dispatcher {
    project: Arc<Project>,
    state: Mutex<DispatchState>,
    store: Arc<dyn JobStore>,
    bus: Arc<dyn EventBus>,
    engine: Arc<dyn ExecutionEngine>,
    engine_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        project: Arc<Project>,
        store: Arc<dyn JobStore>,
        bus: Arc<dyn EventBus>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        let state = DispatchState {
            queue: DispatchQueue::with_dedup_capacity(project.dedup_capacity),
            slots: WorkerSlots::new(&project.workers),
        };
        let engine_timeout = Duration::from_secs(project.server.engine_timeout_secs);

        Self {
            project,
            state: Mutex::new(state),
            store,
            bus,
            engine,
            engine_timeout,
        }
    }

    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Number of jobs waiting for a slot.
    pub async fn queue_depth(&self) -> usize {
        self.state.lock().await.queue.depth()
    }

    /// Evaluate every reactive scheduler against a change and queue one job
    /// per bound builder of each scheduler that fires.
    pub async fn handle_change(&self, change: ChangeEvent) -> Result<Vec<JobId>> {
        let now = Utc::now();
        let triggered: Vec<&Scheduler> = self
            .project
            .schedulers()
            .iter()
            .filter(|s| s.fires_on(&change))
            .collect();

        debug!(
            change_id = %change.id,
            category = %change.category,
            files = change.files.len(),
            triggered = triggered.len(),
            "Evaluated change"
        );

        self.bus
            .publish(Event::ChangeReceived(ChangeReceivedPayload {
                change_id: change.id,
                project: change.project.clone(),
                triggered: triggered.len(),
                received_at: change.received_at,
            }))
            .await?;

        let jobs = triggered
            .iter()
            .flat_map(|scheduler| {
                let properties = scheduler.properties_for(&change, now);
                scheduler
                    .builders
                    .iter()
                    .map(move |builder| (scheduler, builder, properties.clone()))
            })
            .map(|(scheduler, builder, properties)| {
                self.new_job(builder, &scheduler.name, TriggerKind::Change, &change, properties)
            })
            .collect();

        let queued = self.enqueue_all(jobs).await?;
        self.process_queue().await?;
        Ok(queued)
    }

    /// Fire a periodic scheduler as of `now`.
    pub async fn fire_periodic(&self, name: &str, now: DateTime<Utc>) -> Result<Vec<JobId>> {
        let scheduler = self
            .project
            .scheduler(name)
            .ok_or_else(|| Error::SchedulerNotFound(name.to_string()))?;
        if !scheduler.is_periodic() {
            return Err(Error::Internal(format!("scheduler `{name}` is not periodic")));
        }

        let change = scheduler.synthesize(&self.project.name, now);
        let properties = scheduler.properties_for(&change, now);
        let jobs = scheduler
            .builders
            .iter()
            .map(|builder| {
                self.new_job(
                    builder,
                    &scheduler.name,
                    TriggerKind::Periodic,
                    &change,
                    properties.clone(),
                )
            })
            .collect();

        info!(scheduler = %name, "Periodic scheduler fired");
        let queued = self.enqueue_all(jobs).await?;
        self.process_queue().await?;
        Ok(queued)
    }

    /// Trigger every builder of a scheduler, ignoring its matcher.
    pub async fn force(&self, name: &str, request: ForceRequest) -> Result<Vec<JobId>> {
        let scheduler = self
            .project
            .scheduler(name)
            .ok_or_else(|| Error::SchedulerNotFound(name.to_string()))?;

        let overrides = request.properties.clone();
        let change = request.into_change(&self.project);
        let mut properties = scheduler.properties_for(&change, Utc::now());
        properties.extend(overrides);

        let jobs = scheduler
            .builders
            .iter()
            .map(|builder| {
                self.new_job(
                    builder,
                    &scheduler.name,
                    TriggerKind::Manual,
                    &change,
                    properties.clone(),
                )
            })
            .collect();

        info!(scheduler = %name, "Scheduler forced");
        let queued = self.enqueue_all(jobs).await?;
        self.process_queue().await?;
        Ok(queued)
    }

    /// Trigger a single builder.
    pub async fn force_builder(&self, builder: &str, request: ForceRequest) -> Result<JobId> {
        if self.project.builder(builder).is_none() {
            return Err(Error::BuilderNotFound(builder.to_string()));
        }

        let change = request.into_change(&self.project);
        let properties = change.properties.clone();
        let job = self.new_job(
            builder,
            FORCE_BUILDER_SCHEDULER,
            TriggerKind::Manual,
            &change,
            properties,
        );
        let id = job.id;

        info!(%builder, job_id = %id, "Builder forced");
        self.enqueue_all(vec![job]).await?;
        self.process_queue().await?;
        Ok(id)
    }

    /// Start queued jobs while worker slots are free.
    pub async fn process_queue(&self) -> Result<Vec<JobId>> {
        let mut started = Vec::new();

        loop {
            let job = {
                let mut state = self.state.lock().await;
                let DispatchState { queue, slots } = &mut *state;
                let project = &self.project;

                let Some(job) = queue.poll_where(|job| {
                    project
                        .builder(&job.builder)
                        .is_some_and(|b| slots.available(&b.worker))
                }) else {
                    break;
                };

                let worker = project.builder(&job.builder).map(|b| b.worker.as_str());
                if let Some(worker) = worker {
                    slots.acquire(worker);
                }

                let mut running = job.clone();
                let saved = match running.transition(JobStatus::Running) {
                    Ok(()) => self.store.save(&running).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = saved {
                    warn!(job_id = %job.id, builder = %job.builder, error = %e, "Failed to start job, returning it to the queue");
                    if let Some(worker) = worker {
                        slots.release(worker);
                    }
                    queue.requeue(job);
                    return Err(e);
                }
                running
            };

            started.push(job.id);
            self.start(job).await?;
        }

        Ok(started)
    }

    /// Execution engine callback: the job began running on its worker.
    pub async fn job_started(&self, id: JobId) -> Result<Job> {
        let mut job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        match job.status {
            JobStatus::Running => {}
            status if status.is_terminal() => return Err(Error::JobAlreadyCompleted(id.to_string())),
            status => {
                return Err(Error::InvalidTransition {
                    from: status,
                    to: JobStatus::Running,
                });
            }
        }

        let started_at = Utc::now();
        job.started_at = Some(started_at);
        self.store.save(&job).await?;

        let worker = self
            .project
            .builder(&job.builder)
            .map(|b| b.worker.clone())
            .unwrap_or_default();
        self.bus
            .publish(Event::JobStarted(JobStartedPayload {
                job_id: job.id,
                builder: job.builder.clone(),
                worker,
                started_at,
            }))
            .await?;

        Ok(job)
    }

    /// Execution engine callback: the job reached a terminal status.
    pub async fn job_completed(&self, id: JobId, outcome: JobOutcome) -> Result<Job> {
        let job = self.finish(id, outcome).await?;
        self.process_queue().await?;
        Ok(job)
    }

    /// Operator cancellation. Only pending jobs can be cancelled here; a
    /// running job is cancelled by its engine reporting `cancelled`.
    pub async fn cancel(&self, id: JobId) -> Result<Job> {
        let cancelled = {
            let mut state = self.state.lock().await;
            match state.queue.cancel(id) {
                Some(mut job) => {
                    job.transition(JobStatus::Cancelled)?;
                    job.summary = Some("Cancelled by operator".to_string());
                    self.store.save(&job).await?;
                    Some(job)
                }
                None => None,
            }
        };

        if let Some(job) = cancelled {
            info!(job_id = %id, builder = %job.builder, "Job cancelled");
            self.publish_completed(&job).await?;
            return Ok(job);
        }

        match self.store.get(id).await? {
            None => Err(Error::JobNotFound(id.to_string())),
            Some(job) if job.status.is_terminal() => Err(Error::JobAlreadyCompleted(id.to_string())),
            Some(job) => Err(Error::InvalidTransition {
                from: job.status,
                to: JobStatus::Cancelled,
            }),
        }
    }

    fn new_job(
        &self,
        builder: &str,
        scheduler: &str,
        trigger: TriggerKind,
        change: &ChangeEvent,
        properties: BTreeMap<String, String>,
    ) -> Job {
        // template defaults sit below everything else
        let mut merged = self
            .project
            .builder(builder)
            .map(|b| b.properties.clone())
            .unwrap_or_default();
        merged.extend(properties);
        Job::new(builder, scheduler, trigger, change.clone(), merged)
    }

    async fn enqueue_all(&self, jobs: Vec<Job>) -> Result<Vec<JobId>> {
        let mut queued = Vec::with_capacity(jobs.len());
        {
            let mut state = self.state.lock().await;
            for job in jobs {
                match state.queue.enqueue(job.clone()) {
                    Enqueued::Queued => {
                        self.store.save(&job).await?;
                        queued.push(job);
                    }
                    Enqueued::Duplicate => {
                        debug!(
                            builder = %job.builder,
                            fingerprint = %job.fingerprint.short(),
                            "Dropping duplicate job"
                        );
                    }
                }
            }
        }

        for job in &queued {
            info!(job_id = %job.id, builder = %job.builder, scheduler = %job.scheduler, "Job queued");
            self.bus
                .publish(Event::JobQueued(JobQueuedPayload::from(job)))
                .await?;
        }

        Ok(queued.into_iter().map(|j| j.id).collect())
    }

    async fn start(&self, job: Job) -> Result<()> {
        let Some(builder) = self.project.builder(&job.builder) else {
            self.finish(job.id, exception("builder no longer exists"))
                .await?;
            return Ok(());
        };

        let assignment = self.assignment(&job, builder);
        let endpoint = self
            .project
            .worker_for(builder)
            .and_then(|w| w.endpoint.as_deref());

        let failure = match tokio::time::timeout(
            self.engine_timeout,
            self.engine.start(&assignment, endpoint),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "execution engine did not answer within {}s",
                self.engine_timeout.as_secs()
            )),
        };

        match failure {
            None => {
                info!(job_id = %job.id, builder = %job.builder, worker = %builder.worker, "Job dispatched");
            }
            Some(reason) => {
                warn!(job_id = %job.id, builder = %job.builder, %reason, "Execution engine rejected job");
                self.finish(job.id, exception(&reason)).await?;
            }
        }
        Ok(())
    }

    fn assignment(&self, job: &Job, builder: &Builder) -> JobAssignment {
        let mut properties = job.properties.clone();
        let builtins = [
            ("project", Some(job.change.project.clone())),
            ("repository", job.change.repository.clone()),
            ("branch", job.change.branch.clone()),
            ("revision", job.change.revision.clone()),
        ];
        for (key, value) in builtins {
            if let Some(value) = value {
                properties.entry(key.to_string()).or_insert(value);
            }
        }

        let context = PropertyContext::new(properties);
        JobAssignment {
            job_id: job.id,
            builder: builder.name.clone(),
            worker: builder.worker.clone(),
            image: builder.image.to_string(),
            repository: job.change.repository.clone(),
            branch: job.change.branch.clone(),
            revision: job.change.revision.clone(),
            steps: builder.render_steps(&context),
            properties: context.properties,
        }
    }

    async fn finish(&self, id: JobId, outcome: JobOutcome) -> Result<Job> {
        let job = {
            let mut state = self.state.lock().await;
            let mut job = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

            // Only a job holding a slot can finish; pending jobs leave through `cancel`.
            match job.status {
                JobStatus::Running => job.transition(outcome.status)?,
                status if status.is_terminal() => {
                    return Err(Error::JobAlreadyCompleted(id.to_string()));
                }
                status => {
                    return Err(Error::InvalidTransition {
                        from: status,
                        to: outcome.status,
                    });
                }
            }
            job.outputs.extend(outcome.outputs);
            job.summary = outcome.summary;

            state.queue.complete(&job.builder);
            if let Some(builder) = self.project.builder(&job.builder) {
                state.slots.release(&builder.worker);
            }
            self.store.save(&job).await?;
            job
        };

        info!(
            job_id = %job.id,
            builder = %job.builder,
            status = %job.status,
            duration_ms = job.duration_ms(),
            "Job completed"
        );
        self.publish_completed(&job).await?;
        Ok(job)
    }

    async fn publish_completed(&self, job: &Job) -> Result<()> {
        self.bus
            .publish(Event::JobCompleted(JobCompletedPayload { job: job.clone() }))
            .await
    }
}

fn exception(reason: &str) -> JobOutcome {
    let mut outcome = JobOutcome::new(JobStatus::Exception);
    outcome.summary = Some(reason.to_string());
    outcome
}
