//! Reporter definitions.

use crate::job::{Job, JobStatus};
use crate::secrets::SecretValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default low-water mark: 20% of GitHub's 5000 requests/hour budget.
pub const DEFAULT_LOW_WATER: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// Commit status per (revision, builder).
    Status,
    /// Pull request comment.
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatterKind {
    #[default]
    Summary,
    Benchmark,
    Crossbow,
}

/// Reporter as written in project configuration. Credentials are names
/// resolved at assembly time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    pub name: String,
    pub kind: ReporterKind,
    pub credentials: Vec<String>,
    #[serde(default = "default_report_on")]
    pub report_on: BTreeSet<JobStatus>,
    /// Builder or template names; empty means every builder.
    #[serde(default)]
    pub builders: Vec<String>,
    #[serde(default)]
    pub formatter: FormatterKind,
    #[serde(default = "default_low_water")]
    pub low_water: u32,
    /// System name in status contexts (`"<context> / <builder>"`).
    #[serde(default = "default_context")]
    pub context: String,
}

fn default_report_on() -> BTreeSet<JobStatus> {
    [
        JobStatus::Success,
        JobStatus::Failure,
        JobStatus::Exception,
        JobStatus::Cancelled,
    ]
    .into_iter()
    .collect()
}

fn default_low_water() -> u32 {
    DEFAULT_LOW_WATER
}

fn default_context() -> String {
    "beacon".to_string()
}

/// An assembled reporter: resolved tokens and builder names.
#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub name: String,
    pub kind: ReporterKind,
    pub tokens: Vec<SecretValue>,
    pub report_on: BTreeSet<JobStatus>,
    /// `None` reports on every builder.
    pub builders: Option<BTreeSet<String>>,
    pub formatter: FormatterKind,
    pub low_water: u32,
    pub context: String,
}

impl ReporterSettings {
    pub fn new(name: impl Into<String>, kind: ReporterKind, tokens: Vec<SecretValue>) -> Self {
        Self {
            name: name.into(),
            kind,
            tokens,
            report_on: default_report_on(),
            builders: None,
            formatter: FormatterKind::default(),
            low_water: DEFAULT_LOW_WATER,
            context: default_context(),
        }
    }

    pub fn with_report_on(mut self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.report_on = statuses.into_iter().collect();
        self
    }

    pub fn with_builders<I, S>(mut self, builders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builders = Some(builders.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_formatter(mut self, formatter: FormatterKind) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_low_water(mut self, low_water: u32) -> Self {
        self.low_water = low_water;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// True if this reporter should emit for the job's status and builder.
    pub fn accepts(&self, job: &Job) -> bool {
        self.report_on.contains(&job.status)
            && self
                .builders
                .as_ref()
                .is_none_or(|builders| builders.contains(&job.builder))
    }

    /// Token values, for masking in outward text.
    pub fn secret_values(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(SecretValue::expose)
    }
}
