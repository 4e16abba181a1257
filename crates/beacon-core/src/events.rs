//! Events published on the in-process event bus.

use crate::ids::{ChangeId, JobId};
use crate::job::{Job, JobStatus, TriggerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All events in the Beacon CI system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ChangeReceived(ChangeReceivedPayload),
    JobQueued(JobQueuedPayload),
    JobStarted(JobStartedPayload),
    JobCompleted(JobCompletedPayload),
}

impl Event {
    /// Dotted subject used for pattern subscriptions.
    pub fn subject(&self) -> String {
        match self {
            Event::ChangeReceived(p) => format!("change.received.{}", p.project),
            Event::JobQueued(p) => format!("job.queued.{}", p.job_id),
            Event::JobStarted(p) => format!("job.started.{}", p.job_id),
            Event::JobCompleted(p) => format!("job.completed.{}", p.job.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReceivedPayload {
    pub change_id: ChangeId,
    pub project: String,
    pub triggered: usize,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueuedPayload {
    pub job_id: JobId,
    pub builder: String,
    pub scheduler: String,
    pub trigger: TriggerKind,
    pub revision: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl From<&Job> for JobQueuedPayload {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            builder: job.builder.clone(),
            scheduler: job.scheduler.clone(),
            trigger: job.trigger,
            revision: job.change.revision.clone(),
            queued_at: job.queued_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartedPayload {
    pub job_id: JobId,
    pub builder: String,
    pub worker: String,
    pub started_at: DateTime<Utc>,
}

/// Carries the full terminal job so reporters need no store lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCompletedPayload {
    pub job: Job,
}

impl JobCompletedPayload {
    pub fn status(&self) -> JobStatus {
        self.job.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Category, ChangeEvent};
    use std::collections::BTreeMap;

    #[test]
    fn test_subjects() {
        let job = Job::new(
            "b",
            "s",
            TriggerKind::Manual,
            ChangeEvent::new("arrow", Category::Untagged),
            BTreeMap::new(),
        );
        let queued = Event::JobQueued(JobQueuedPayload::from(&job));
        assert_eq!(queued.subject(), format!("job.queued.{}", job.id));

        let completed = Event::JobCompleted(JobCompletedPayload { job });
        assert!(completed.subject().starts_with("job.completed.job_"));
    }

    #[test]
    fn test_event_is_tagged() {
        let event = Event::ChangeReceived(ChangeReceivedPayload {
            change_id: ChangeId::new(),
            project: "arrow".into(),
            triggered: 2,
            received_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "change_received");
    }
}
