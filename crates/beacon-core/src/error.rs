//! Error types for Beacon CI.

use crate::job::JobStatus;
use std::fmt;
use thiserror::Error;

/// A single problem found while assembling a project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Duplicate builder name: {0}")]
    DuplicateBuilder(String),

    #[error("Duplicate scheduler name: {0}")]
    DuplicateScheduler(String),

    #[error("Duplicate worker name: {0}")]
    DuplicateWorker(String),

    #[error("Duplicate environment name: {0}")]
    DuplicateEnvironment(String),

    #[error("Duplicate template name: {0}")]
    DuplicateTemplate(String),

    #[error("Duplicate reporter name: {0}")]
    DuplicateReporter(String),

    #[error("`{owner}` references unknown builder `{builder}`")]
    UnknownBuilder { owner: String, builder: String },

    #[error("Scheduler `{scheduler}` binds no builders")]
    EmptyScheduler { scheduler: String },

    #[error("`{owner}` references unknown worker `{worker}`")]
    UnknownWorker { owner: String, worker: String },

    #[error("Reporter `{reporter}` references unknown credential `{credential}`")]
    UnknownCredential { reporter: String, credential: String },

    #[error("Reporter `{reporter}` has no credentials")]
    MissingCredentials { reporter: String },

    #[error("Invalid glob pattern {pattern:?}: {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("Invalid matcher: {0}")]
    InvalidMatcher(String),

    #[error("Invalid cadence for scheduler `{scheduler}`: {reason}")]
    InvalidCadence { scheduler: String, reason: String },

    #[error("Template `{template}` produced no builders")]
    NoBuilders { template: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Every problem found in one configuration, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ConfigError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.0.iter()
    }

    /// Turn the collected problems into a result, failing if any were recorded.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, ConfigErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl From<ConfigError> for ConfigErrors {
    fn from(error: ConfigError) -> Self {
        Self(vec![error])
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // Load-time errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigErrors),

    // Lookup errors
    #[error("Scheduler not found: {0}")]
    SchedulerNotFound(String),

    #[error("Builder not found: {0}")]
    BuilderNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // Job lifecycle errors
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job already completed: {0}")]
    JobAlreadyCompleted(String),

    // Execution errors
    #[error("Execution engine error: {0}")]
    Execution(String),

    // Reporting errors
    #[error("Reporting failed: {0}")]
    Reporting(String),

    // Inbound event errors
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Configuration(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_display_lists_every_problem() {
        let mut errors = ConfigErrors::new();
        errors.push(ConfigError::DuplicateBuilder("cpp w1 ubuntu".to_string()));
        errors.push(ConfigError::UnknownBuilder {
            owner: "nightly".to_string(),
            builder: "missing".to_string(),
        });

        let text = Error::from(errors).to_string();
        assert!(text.contains("2 configuration error(s)"));
        assert!(text.contains("Duplicate builder name: cpp w1 ubuntu"));
        assert!(text.contains("references unknown builder `missing`"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ConfigErrors::new().into_result(5), Ok(5));
        let failing = ConfigErrors::from(ConfigError::Invalid("x".into())).into_result(5);
        assert!(failing.is_err());
    }
}
