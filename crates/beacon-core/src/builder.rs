//! Builder templates and concrete builders.

use crate::environment::{EnvironmentDescriptor, ImageRef};
use crate::interpolation::{BuilderBinding, PropertyContext};
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One command of a builder, with `${{ ... }}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default = "default_halt_on_failure")]
    pub halt_on_failure: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_halt_on_failure() -> bool {
    true
}

impl StepTemplate {
    pub fn new<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            workdir: None,
            halt_on_failure: true,
            env: BTreeMap::new(),
        }
    }

    pub fn in_dir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    fn map(&self, f: impl Fn(&str) -> String) -> Self {
        Self {
            name: self.name.clone(),
            command: self.command.iter().map(|arg| f(arg)).collect(),
            workdir: self.workdir.as_deref().map(&f),
            halt_on_failure: self.halt_on_failure,
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), f(v)))
                .collect(),
        }
    }
}

/// A parametrized kind of build, instantiated once per compatible
/// (worker, environment) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderTemplate {
    pub name: String,
    /// Environment tags this template can run on.
    pub tags: BTreeSet<String>,
    /// Worker capability required to host the template.
    #[serde(default)]
    pub requires: Option<String>,
    /// Default properties, overridden by scheduler and event properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub steps: Vec<StepTemplate>,
}

impl BuilderTemplate {
    pub fn new<I, S>(name: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            requires: None,
            properties: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.requires = Some(capability.into());
        self
    }

    pub fn with_step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Fully-qualified builder name for a (worker, environment) pair.
    pub fn builder_name(&self, worker: &str, environment: &str) -> String {
        format!("{} {} {}", self.name, worker, environment)
    }

    /// Bind this template to one worker and environment.
    pub fn instantiate(&self, worker: &Worker, environment: &EnvironmentDescriptor) -> Builder {
        let name = self.builder_name(&worker.name, &environment.name);
        let binding = BuilderBinding {
            name: name.clone(),
            worker: worker.name.clone(),
            environment: environment.name.clone(),
            image: environment.image.to_string(),
        };

        Builder {
            name,
            template: self.name.clone(),
            worker: worker.name.clone(),
            environment: environment.name.clone(),
            image: environment.image.clone(),
            properties: self.properties.clone(),
            steps: self.steps.iter().map(|s| s.map(|v| binding.bind(v))).collect(),
        }
    }
}

/// A concrete, uniquely named schedulable unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    pub name: String,
    pub template: String,
    pub worker: String,
    pub environment: String,
    pub image: ImageRef,
    pub properties: BTreeMap<String, String>,
    pub steps: Vec<StepTemplate>,
}

/// A step with every placeholder resolved, ready for the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedStep {
    pub name: String,
    pub command: Vec<String>,
    pub workdir: Option<String>,
    pub halt_on_failure: bool,
    pub env: BTreeMap<String, String>,
}

impl Builder {
    pub fn render_steps(&self, ctx: &PropertyContext) -> Vec<RenderedStep> {
        self.steps
            .iter()
            .map(|step| {
                let rendered = step.map(|v| ctx.render(v));
                RenderedStep {
                    name: rendered.name,
                    command: rendered.command,
                    workdir: rendered.workdir,
                    halt_on_failure: rendered.halt_on_failure,
                    env: rendered.env,
                }
            })
            .collect()
    }
}
