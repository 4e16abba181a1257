//! Build environment descriptors.
//!
//! The image catalog itself lives outside the engine; it is consumed here as
//! a flat list of named, tagged environments.

use crate::error::{ConfigError, ConfigErrors};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Reference to a buildable container image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// One buildable OS/toolchain combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
    pub name: String,
    /// Builder-template tags this environment can serve.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub image: ImageRef,
    /// Pinned CPU architecture, if the image is architecture specific.
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

impl EnvironmentDescriptor {
    pub fn new(name: impl Into<String>, image: ImageRef) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            image,
            arch: None,
            os: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    /// True if any of this environment's tags is in `tags`.
    pub fn serves_any(&self, tags: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(tags)
    }
}

/// Selection criteria for listing environments.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentFilter {
    pub name: Option<String>,
    pub arch: Option<String>,
    pub os: Option<String>,
    pub tag: Option<String>,
}

impl EnvironmentFilter {
    pub fn accepts(&self, env: &EnvironmentDescriptor) -> bool {
        let name_ok = self
            .name
            .as_deref()
            .is_none_or(|pattern| wildcard_eq(pattern, &env.name));
        let arch_ok = self
            .arch
            .as_deref()
            .is_none_or(|arch| env.arch.as_deref() == Some(arch));
        let os_ok = self
            .os
            .as_deref()
            .is_none_or(|os| env.os.as_deref() == Some(os));
        let tag_ok = self.tag.as_deref().is_none_or(|tag| env.tags.contains(tag));
        name_ok && arch_ok && os_ok && tag_ok
    }
}

// Supports a single trailing or leading `*`, enough for CLI listing.
fn wildcard_eq(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return text.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return text.ends_with(suffix);
    }
    pattern == text
}

/// Read-only collection of uniquely named environments, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentCatalog {
    descriptors: Vec<EnvironmentDescriptor>,
}

impl EnvironmentCatalog {
    pub fn new(descriptors: Vec<EnvironmentDescriptor>) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut seen = HashSet::new();
        for env in &descriptors {
            if env.name.trim().is_empty() {
                errors.push(ConfigError::Invalid("environment with empty name".to_string()));
            } else if !seen.insert(env.name.as_str()) {
                errors.push(ConfigError::DuplicateEnvironment(env.name.clone()));
            }
        }
        errors.into_result(Self { descriptors })
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentDescriptor> {
        self.descriptors.iter().find(|env| env.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentDescriptor> {
        self.descriptors.iter()
    }

    pub fn as_slice(&self) -> &[EnvironmentDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn filter<'a>(
        &'a self,
        filter: &'a EnvironmentFilter,
    ) -> impl Iterator<Item = &'a EnvironmentDescriptor> + 'a {
        self.descriptors.iter().filter(move |env| filter.accepts(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ubuntu(name: &str, arch: &str) -> EnvironmentDescriptor {
        EnvironmentDescriptor::new(name, ImageRef::new(format!("beacon/{name}"), "latest"))
            .with_tags(["cpp"])
            .with_arch(arch)
            .with_os("linux")
    }

    #[test]
    fn test_catalog_rejects_duplicate_names() {
        let err = EnvironmentCatalog::new(vec![
            ubuntu("amd64-ubuntu-18.04", "amd64"),
            ubuntu("amd64-ubuntu-18.04", "amd64"),
        ])
        .unwrap_err();
        assert_eq!(
            err.0,
            vec![ConfigError::DuplicateEnvironment("amd64-ubuntu-18.04".to_string())]
        );
    }

    #[test]
    fn test_filter_by_arch_and_name() {
        let catalog = EnvironmentCatalog::new(vec![
            ubuntu("amd64-ubuntu-18.04", "amd64"),
            ubuntu("arm64v8-ubuntu-18.04", "arm64v8"),
            ubuntu("amd64-alpine-3.9", "amd64"),
        ])
        .unwrap();

        let filter = EnvironmentFilter {
            arch: Some("amd64".to_string()),
            name: Some("*ubuntu-18.04".to_string()),
            ..Default::default()
        };
        let names: Vec<_> = catalog.filter(&filter).map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["amd64-ubuntu-18.04"]);
    }

    #[test]
    fn test_serves_any() {
        let env = ubuntu("amd64-ubuntu-18.04", "amd64");
        let cpp: BTreeSet<String> = ["cpp".to_string()].into();
        let python: BTreeSet<String> = ["python".to_string()].into();
        assert!(env.serves_any(&cpp));
        assert!(!env.serves_any(&python));
    }

    #[test]
    fn test_image_display() {
        assert_eq!(ImageRef::new("beacon/cpp", "18.04").to_string(), "beacon/cpp:18.04");
    }
}
