//! Worker types.

use crate::error::{ConfigError, ConfigErrors};
use crate::secrets::SecretValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// One execution slot provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    /// Capabilities advertised to builder templates (e.g. `docker`, `gpu`).
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Maximum number of concurrently running builds.
    #[serde(default = "default_max_builds")]
    pub max_builds: u32,
    #[serde(default)]
    pub arch: Option<String>,
    /// Base URL of the execution engine serving this worker.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Resolved credential the worker authenticates with.
    #[serde(skip)]
    pub credential: Option<SecretValue>,
}

fn default_max_builds() -> u32 {
    1
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: BTreeSet::new(),
            max_builds: default_max_builds(),
            arch: None,
            endpoint: None,
            credential: None,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_max_builds(mut self, max_builds: u32) -> Self {
        self.max_builds = max_builds;
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// A worker with no declared arch can host any architecture-pinned image.
    pub fn supports_arch(&self, arch: Option<&str>) -> bool {
        match (self.arch.as_deref(), arch) {
            (_, None) | (None, _) => true,
            (Some(own), Some(wanted)) => own == wanted,
        }
    }
}

/// Uniquely named workers, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Worker>) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut seen = HashSet::new();
        for worker in &workers {
            if worker.name.trim().is_empty() {
                errors.push(ConfigError::Invalid("worker with empty name".to_string()));
            } else if !seen.insert(worker.name.as_str()) {
                errors.push(ConfigError::DuplicateWorker(worker.name.clone()));
            }
            if worker.max_builds == 0 {
                errors.push(ConfigError::Invalid(format!(
                    "worker `{}` has max_builds = 0",
                    worker.name
                )));
            }
        }
        errors.into_result(Self { workers })
    }

    pub fn get(&self, name: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }

    pub fn as_slice(&self) -> &[Worker] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_rejects_duplicates_and_zero_capacity() {
        let err = WorkerPool::new(vec![
            Worker::new("ursa-1"),
            Worker::new("ursa-1"),
            Worker::new("ursa-2").with_max_builds(0),
        ])
        .unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.iter().any(|e| *e == ConfigError::DuplicateWorker("ursa-1".into())));
    }

    #[test]
    fn test_arch_support() {
        let any = Worker::new("w");
        let amd = Worker::new("w").with_arch("amd64");
        assert!(any.supports_arch(Some("arm64v8")));
        assert!(amd.supports_arch(None));
        assert!(amd.supports_arch(Some("amd64")));
        assert!(!amd.supports_arch(Some("arm64v8")));
    }

    #[test]
    fn test_worker_deserializes_with_defaults() {
        let worker: Worker = serde_json::from_str(r#"{"name": "ursa-1"}"#).unwrap();
        assert_eq!(worker.max_builds, 1);
        assert!(worker.capabilities.is_empty());
        assert!(worker.credential.is_none());
    }
}
