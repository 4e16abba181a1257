//! Change matching.
//!
//! A [`MatcherSpec`] is the configuration form of a change filter; it is
//! compiled once at assembly time into a [`Matcher`], a tree of combinators
//! over leaf predicates evaluated against incoming [`ChangeEvent`]s.

use crate::glob::Glob;
use beacon_core::ConfigError;
use beacon_core::change::{Category, ChangeEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Configuration form of a matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherSpec {
    All(Vec<MatcherSpec>),
    Any(Vec<MatcherSpec>),
    Not(Box<MatcherSpec>),
    Project(String),
    Branch(Vec<String>),
    Category(Vec<Category>),
    Paths(Vec<String>),
    Property { key: String, value: String },
}

/// Compiled change filter. Evaluation is pure and never fails.
#[derive(Debug, Clone)]
pub enum Matcher {
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Not(Box<Matcher>),
    Project(String),
    Branch(Vec<Glob>),
    Category(BTreeSet<Category>),
    Paths(Vec<Glob>),
    Property { key: String, value: String },
}

impl Matcher {
    pub fn compile(spec: &MatcherSpec) -> Result<Self, ConfigError> {
        let invalid = |msg: &str| ConfigError::InvalidMatcher(msg.to_string());

        Ok(match spec {
            MatcherSpec::All(children) | MatcherSpec::Any(children) => {
                if children.is_empty() {
                    return Err(invalid("`all`/`any` needs at least one child"));
                }
                let compiled = children
                    .iter()
                    .map(Self::compile)
                    .collect::<Result<Vec<_>, _>>()?;
                if matches!(spec, MatcherSpec::All(_)) {
                    Matcher::All(compiled)
                } else {
                    Matcher::Any(compiled)
                }
            }
            MatcherSpec::Not(inner) => Matcher::Not(Box::new(Self::compile(inner)?)),
            MatcherSpec::Project(project) => {
                if project.trim().is_empty() {
                    return Err(invalid("`project` must not be empty"));
                }
                Matcher::Project(project.clone())
            }
            MatcherSpec::Branch(patterns) => {
                if patterns.is_empty() {
                    return Err(invalid("`branch` needs at least one pattern"));
                }
                Matcher::Branch(compile_globs(patterns)?)
            }
            MatcherSpec::Category(categories) => {
                if categories.is_empty() {
                    return Err(invalid("`category` needs at least one category"));
                }
                Matcher::Category(categories.iter().copied().collect())
            }
            MatcherSpec::Paths(patterns) => {
                if patterns.is_empty() {
                    return Err(invalid("`paths` needs at least one pattern"));
                }
                Matcher::Paths(compile_globs(patterns)?)
            }
            MatcherSpec::Property { key, value } => {
                if key.trim().is_empty() {
                    return Err(invalid("`property` key must not be empty"));
                }
                Matcher::Property {
                    key: key.clone(),
                    value: value.clone(),
                }
            }
        })
    }

    /// Evaluate the filter against a change.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            Matcher::All(children) => children.iter().all(|m| m.matches(event)),
            Matcher::Any(children) => children.iter().any(|m| m.matches(event)),
            Matcher::Not(inner) => !inner.matches(event),
            Matcher::Project(project) => event.project == *project,
            Matcher::Branch(globs) => event
                .branch
                .as_deref()
                .is_some_and(|branch| globs.iter().any(|g| g.matches(branch))),
            Matcher::Category(categories) => categories.contains(&event.category),
            Matcher::Paths(globs) => paths_match(globs, event),
            Matcher::Property { key, value } => event.property(key) == Some(value.as_str()),
        }
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Glob>, ConfigError> {
    patterns.iter().map(|p| Glob::compile(p)).collect()
}

// A command comment carries no file information; path filters step aside
// for it and let the property predicates decide.
fn paths_match(globs: &[Glob], event: &ChangeEvent) -> bool {
    if event.files.is_empty() {
        return event.is_command();
    }

    event
        .files
        .iter()
        .filter(|path| is_well_formed(path))
        .any(|path| globs.iter().any(|g| g.matches(path)))
}

fn is_well_formed(path: &str) -> bool {
    !path.is_empty() && !path.contains('\0') && !path.split('/').any(|seg| seg == "..")
}
