//! Job and execution types.

use crate::change::ChangeEvent;
use crate::error::{Error, Result};
use crate::ids::{Fingerprint, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Exception,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Exception | JobStatus::Cancelled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }

    /// Transitions only move forward: pending -> running -> terminal. A
    /// pending job may also be cancelled before it ever runs.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(next, JobStatus::Running | JobStatus::Cancelled),
            JobStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Exception => "exception",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a job to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Change,
    Periodic,
    Manual,
}

/// One instance of "run builder B in reaction to change/trigger E".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub builder: String,
    pub scheduler: String,
    pub trigger: TriggerKind,
    pub change: ChangeEvent,
    pub properties: BTreeMap<String, String>,
    pub fingerprint: Fingerprint,
    pub status: JobStatus,
    /// Key/value outputs published by the execution engine.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        builder: impl Into<String>,
        scheduler: impl Into<String>,
        trigger: TriggerKind,
        change: ChangeEvent,
        properties: BTreeMap<String, String>,
    ) -> Self {
        let builder = builder.into();
        let fingerprint = Self::fingerprint_for(&builder, &change);
        Self {
            id: JobId::new(),
            builder,
            scheduler: scheduler.into(),
            trigger,
            change,
            properties,
            fingerprint,
            status: JobStatus::Pending,
            outputs: BTreeMap::new(),
            summary: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Job identity: the builder name plus the fingerprint of the change.
    pub fn fingerprint_for(builder: &str, change: &ChangeEvent) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update((builder.len() as u64).to_le_bytes());
        hasher.update(builder.as_bytes());
        hasher.update(change.fingerprint().as_str().as_bytes());
        Fingerprint::from_hex(hex::encode(hasher.finalize()))
    }

    /// Move to `next`, stamping start/completion times.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            if self.status.is_terminal() {
                return Err(Error::JobAlreadyCompleted(self.id.to_string()));
            }
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// Terminal result reported by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl JobOutcome {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            outputs: BTreeMap::new(),
            summary: None,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}
