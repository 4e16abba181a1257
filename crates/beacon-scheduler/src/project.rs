//! Project configuration and assembly.
//!
//! [`ProjectConfig`] is the YAML document an operator writes. [`assemble`]
//! validates all of it in one pass, expands templates into builders, binds
//! schedulers and resolves credentials. It either returns an immutable
//! [`Project`] or every problem it found; a project is never partially
//! loaded.

use crate::factory::BuilderFactory;
use crate::matcher::{Matcher, MatcherSpec};
use crate::queue::DEFAULT_DEDUP_CAPACITY;
use crate::schedulers::{Cadence, PropertyValue, Scheduler, SchedulerKind};
use beacon_core::builder::{Builder, BuilderTemplate};
use beacon_core::environment::{EnvironmentCatalog, EnvironmentDescriptor};
use beacon_core::ports::SecretSource;
use beacon_core::reporting::{ReporterConfig, ReporterSettings};
use beacon_core::secrets::SecretValue;
use beacon_core::worker::{Worker, WorkerPool};
use beacon_core::{ConfigError, ConfigErrors, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project identifier carried by every change, e.g. `arrow`.
    pub name: String,
    /// `owner/repo` on the source-control host.
    pub repo: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Handle comment commands are addressed to, without the `@`.
    #[serde(default = "default_bot_handle")]
    pub bot_handle: String,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub environments: Vec<EnvironmentDescriptor>,
    #[serde(default)]
    pub templates: Vec<BuilderTemplate>,
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
    #[serde(default)]
    pub reporters: Vec<ReporterConfig>,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub enable: FeatureFlags,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_bot_handle() -> String {
    "beacon".to_string()
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

impl ProjectConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| Error::from(ConfigError::Invalid(format!("malformed project file: {e}"))))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loading project configuration");
        Self::from_yaml(&text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(flatten)]
    pub worker: Worker,
    /// Name of the secret the worker authenticates with.
    #[serde(default)]
    pub credential: Option<String>,
}

impl From<Worker> for WorkerConfig {
    fn from(worker: Worker) -> Self {
        Self {
            worker,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    Reactive,
    Periodic,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub name: String,
    pub kind: SchedulerType,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub matcher: Option<MatcherSpec>,
    #[serde(default)]
    pub cadence: Option<Cadence>,
    /// Builder names or template names.
    pub builders: Vec<String>,
    /// Restricts template references to builders on these workers.
    #[serde(default)]
    pub workers: Option<Vec<String>>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Secret used for reading pull request files.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            credential: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Secret holding the webhook HMAC key.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Bound on each execution engine call.
    #[serde(default = "default_timeout_secs")]
    pub engine_timeout_secs: u64,
    /// Bound on each reporter call.
    #[serde(default = "default_timeout_secs")]
    pub report_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8100".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            webhook_secret: None,
            engine_timeout_secs: default_timeout_secs(),
            report_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "enabled")]
    pub webhooks: bool,
    #[serde(default = "enabled")]
    pub reporters: bool,
    #[serde(default = "enabled")]
    pub periodic: bool,
}

fn enabled() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            webhooks: true,
            reporters: true,
            periodic: true,
        }
    }
}

/// An assembled, validated project. Immutable; shared as `Arc<Project>`.
#[derive(Debug)]
pub struct Project {
    pub name: String,
    pub repo: String,
    pub url: Option<String>,
    pub bot_handle: String,
    pub workers: WorkerPool,
    pub environments: EnvironmentCatalog,
    pub templates: Vec<BuilderTemplate>,
    pub reporters: Vec<ReporterSettings>,
    pub github: GithubConfig,
    pub github_token: Option<SecretValue>,
    pub server: ServerConfig,
    pub webhook_secret: Option<SecretValue>,
    pub enable: FeatureFlags,
    pub dedup_capacity: usize,
    builders: Vec<Builder>,
    builder_index: HashMap<String, usize>,
    schedulers: Vec<Scheduler>,
}

impl Project {
    pub fn builders(&self) -> &[Builder] {
        &self.builders
    }

    pub fn builder(&self, name: &str) -> Option<&Builder> {
        self.builder_index.get(name).map(|&i| &self.builders[i])
    }

    pub fn schedulers(&self) -> &[Scheduler] {
        &self.schedulers
    }

    pub fn scheduler(&self, name: &str) -> Option<&Scheduler> {
        self.schedulers.iter().find(|s| s.name == name)
    }

    pub fn worker_for(&self, builder: &Builder) -> Option<&Worker> {
        self.workers.get(&builder.worker)
    }

    /// Every secret value the project knows, for masking outward text.
    pub fn secret_values(&self) -> Vec<String> {
        let workers = self.workers.iter().filter_map(|w| w.credential.as_ref());
        let reporters = self.reporters.iter().flat_map(|r| r.tokens.iter());
        workers
            .chain(reporters)
            .chain(self.github_token.as_ref())
            .chain(self.webhook_secret.as_ref())
            .map(|s| s.expose().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Validate a configuration and build the immutable project.
pub fn assemble(config: ProjectConfig, secrets: &dyn SecretSource) -> Result<Project> {
    let mut errors = ConfigErrors::new();

    if config.name.trim().is_empty() {
        errors.push(ConfigError::Invalid("project name is empty".into()));
    }
    if !config.repo.contains('/') {
        errors.push(ConfigError::Invalid(format!(
            "repo `{}` is not of the form owner/repo",
            config.repo
        )));
    }

    let workers = resolve_workers(config.workers, secrets, &mut errors);
    let workers = absorb(WorkerPool::new(workers), &mut errors).unwrap_or_default();
    let environments =
        absorb(EnvironmentCatalog::new(config.environments), &mut errors).unwrap_or_default();

    let mut template_names = HashSet::new();
    for template in &config.templates {
        if !template_names.insert(template.name.as_str()) {
            errors.push(ConfigError::DuplicateTemplate(template.name.clone()));
        }
    }

    let builders = absorb(
        BuilderFactory::expand_all(&config.templates, workers.as_slice(), environments.as_slice()),
        &mut errors,
    )
    .unwrap_or_default();
    let builder_index: HashMap<String, usize> = builders
        .iter()
        .enumerate()
        .map(|(i, b)| (b.name.clone(), i))
        .collect();

    let resolver = BuilderRefs {
        builders: &builders,
        index: &builder_index,
    };

    let mut scheduler_names = HashSet::new();
    let mut schedulers = Vec::with_capacity(config.schedulers.len());
    for definition in config.schedulers {
        if !scheduler_names.insert(definition.name.clone()) {
            errors.push(ConfigError::DuplicateScheduler(definition.name.clone()));
            continue;
        }
        if let Some(scheduler) = build_scheduler(definition, &resolver, &workers, &mut errors) {
            schedulers.push(scheduler);
        }
    }

    let mut reporter_names = HashSet::new();
    let mut reporters = Vec::with_capacity(config.reporters.len());
    for definition in config.reporters {
        if !reporter_names.insert(definition.name.clone()) {
            errors.push(ConfigError::DuplicateReporter(definition.name.clone()));
            continue;
        }
        if let Some(reporter) = build_reporter(definition, &resolver, secrets, &mut errors) {
            reporters.push(reporter);
        }
    }

    let github_token = resolve_optional(
        "github",
        config.github.credential.as_deref(),
        secrets,
        &mut errors,
    );
    let webhook_secret = resolve_optional(
        "server",
        config.server.webhook_secret.as_deref(),
        secrets,
        &mut errors,
    );

    if config.dedup_capacity == 0 {
        debug!("Job de-duplication disabled");
    }

    let project = Project {
        name: config.name,
        repo: config.repo,
        url: config.url,
        bot_handle: config.bot_handle,
        workers,
        environments,
        templates: config.templates,
        reporters,
        github: config.github,
        github_token,
        server: config.server,
        webhook_secret,
        enable: config.enable,
        dedup_capacity: config.dedup_capacity,
        builders,
        builder_index,
        schedulers,
    };

    let project = errors.into_result(project)?;
    info!(
        project = %project.name,
        builders = project.builders.len(),
        schedulers = project.schedulers.len(),
        reporters = project.reporters.len(),
        "Project assembled"
    );
    Ok(project)
}

fn absorb<T>(result: std::result::Result<T, ConfigErrors>, errors: &mut ConfigErrors) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(found) => {
            errors.0.extend(found.0);
            None
        }
    }
}

fn resolve_workers(
    configs: Vec<WorkerConfig>,
    secrets: &dyn SecretSource,
    errors: &mut ConfigErrors,
) -> Vec<Worker> {
    configs
        .into_iter()
        .map(|config| {
            let mut worker = config.worker;
            worker.credential =
                resolve_optional(&worker.name, config.credential.as_deref(), secrets, errors);
            worker
        })
        .collect()
}

fn resolve_optional(
    owner: &str,
    name: Option<&str>,
    secrets: &dyn SecretSource,
    errors: &mut ConfigErrors,
) -> Option<SecretValue> {
    let name = name?;
    let value = secrets.resolve(name);
    if value.is_none() {
        errors.push(ConfigError::UnknownCredential {
            reporter: owner.to_string(),
            credential: name.to_string(),
        });
    }
    value
}

/// Resolves builder references: a full builder name or a template name.
struct BuilderRefs<'a> {
    builders: &'a [Builder],
    index: &'a HashMap<String, usize>,
}

impl BuilderRefs<'_> {
    fn resolve(&self, reference: &str) -> Option<Vec<&Builder>> {
        if let Some(&i) = self.index.get(reference) {
            return Some(vec![&self.builders[i]]);
        }
        let from_template: Vec<&Builder> = self
            .builders
            .iter()
            .filter(|b| b.template == reference)
            .collect();
        (!from_template.is_empty()).then_some(from_template)
    }

    /// Resolve all references in order, dropping repeats.
    fn resolve_all(
        &self,
        owner: &str,
        references: &[String],
        keep: impl Fn(&Builder) -> bool,
        errors: &mut ConfigErrors,
    ) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for reference in references {
            match self.resolve(reference) {
                Some(builders) => {
                    for builder in builders.into_iter().filter(|b| keep(b)) {
                        if seen.insert(builder.name.as_str()) {
                            names.push(builder.name.clone());
                        }
                    }
                }
                None => errors.push(ConfigError::UnknownBuilder {
                    owner: owner.to_string(),
                    builder: reference.clone(),
                }),
            }
        }
        names
    }
}

fn build_scheduler(
    definition: SchedulerConfig,
    resolver: &BuilderRefs<'_>,
    workers: &WorkerPool,
    errors: &mut ConfigErrors,
) -> Option<Scheduler> {
    let name = definition.name;
    let before = errors.len();

    let pinned: Option<BTreeSet<String>> = definition.workers.map(|pinned| {
        for worker in &pinned {
            if workers.get(worker).is_none() {
                errors.push(ConfigError::UnknownWorker {
                    owner: name.clone(),
                    worker: worker.clone(),
                });
            }
        }
        pinned.into_iter().collect()
    });

    let builders = resolver.resolve_all(
        &name,
        &definition.builders,
        |b| pinned.as_ref().is_none_or(|p| p.contains(&b.worker)),
        errors,
    );
    if builders.is_empty() {
        errors.push(ConfigError::EmptyScheduler {
            scheduler: name.clone(),
        });
    }

    for (key, value) in &definition.properties {
        if let Err(reason) = value.validate() {
            errors.push(ConfigError::Invalid(format!(
                "scheduler `{name}` property `{key}`: {reason}"
            )));
        }
    }

    let kind = match definition.kind {
        SchedulerType::Reactive => match definition.matcher.as_ref() {
            Some(spec) => match Matcher::compile(spec) {
                Ok(matcher) => Some(SchedulerKind::Reactive { matcher }),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => {
                errors.push(ConfigError::InvalidMatcher(format!(
                    "reactive scheduler `{name}` has no matcher"
                )));
                None
            }
        },
        SchedulerType::Periodic => match definition.cadence {
            Some(cadence) => match cadence.validate() {
                Ok(()) => Some(SchedulerKind::Periodic { cadence }),
                Err(reason) => {
                    errors.push(ConfigError::InvalidCadence {
                        scheduler: name.clone(),
                        reason,
                    });
                    None
                }
            },
            None => {
                errors.push(ConfigError::InvalidCadence {
                    scheduler: name.clone(),
                    reason: "periodic scheduler has no cadence".into(),
                });
                None
            }
        },
        SchedulerType::Manual => Some(SchedulerKind::Manual),
    };

    if errors.len() > before {
        return None;
    }

    Some(Scheduler {
        name,
        kind: kind?,
        builders,
        properties: definition.properties,
    })
}

fn build_reporter(
    definition: ReporterConfig,
    resolver: &BuilderRefs<'_>,
    secrets: &dyn SecretSource,
    errors: &mut ConfigErrors,
) -> Option<ReporterSettings> {
    let before = errors.len();

    if definition.credentials.is_empty() {
        errors.push(ConfigError::MissingCredentials {
            reporter: definition.name.clone(),
        });
    }
    let tokens: Vec<SecretValue> = definition
        .credentials
        .iter()
        .filter_map(|credential| {
            let value = secrets.resolve(credential);
            if value.is_none() {
                errors.push(ConfigError::UnknownCredential {
                    reporter: definition.name.clone(),
                    credential: credential.clone(),
                });
            }
            value
        })
        .collect();

    let builders = (!definition.builders.is_empty()).then(|| {
        resolver
            .resolve_all(&definition.name, &definition.builders, |_| true, errors)
            .into_iter()
            .collect::<BTreeSet<_>>()
    });

    if errors.len() > before {
        return None;
    }

    Some(ReporterSettings {
        name: definition.name,
        kind: definition.kind,
        tokens,
        report_on: definition.report_on,
        builders,
        formatter: definition.formatter,
        low_water: definition.low_water,
        context: definition.context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::change::{Category, ChangeEvent};
    use pretty_assertions::assert_eq;

    const PROJECT: &str = r#"
name: arrow
repo: apache/arrow
bot_handle: ursabot
workers:
  - name: ursa-1
    capabilities: [docker]
    arch: amd64
    credential: WORKER_1_PASSWORD
  - name: ursa-2
    capabilities: [docker]
    arch: amd64
environments:
  - name: amd64-ubuntu-18.04-cpp
    tags: [cpp]
    arch: amd64
    image: { repository: ursalab/amd64-ubuntu-18.04-cpp }
  - name: amd64-conda-python-3.7
    tags: [python]
    arch: amd64
    image: { repository: ursalab/amd64-conda-python-3.7 }
templates:
  - name: C++ Test
    tags: [cpp]
    requires: docker
    steps:
      - name: cmake
        command: [cmake, "-G", "${{ props.CMAKE_GENERATOR || Ninja }}", "../cpp"]
  - name: Python Test
    tags: [python]
    requires: docker
    steps:
      - name: pytest
        command: [pytest, "-v", pyarrow]
schedulers:
  - name: cpp-changes
    kind: reactive
    matcher:
      any:
        - all:
            - category: [pull, none]
            - paths: ["cpp/*"]
        - all:
            - category: [comment]
            - property: { key: command, value: build }
    builders: [C++ Test]
  - name: nightly
    kind: periodic
    cadence: { hour: 3 }
    builders: [Python Test ursa-1 amd64-conda-python-3.7]
    properties:
      date: { date: "%Y-%m-%d" }
  - name: force
    kind: manual
    builders: [C++ Test, Python Test]
    workers: [ursa-2]
reporters:
  - name: github-status
    kind: status
    credentials: [GITHUB_TOKEN_A, GITHUB_TOKEN_B]
    report_on: [failure, success]
"#;

    fn secrets() -> BTreeMap<String, SecretValue> {
        ["WORKER_1_PASSWORD", "GITHUB_TOKEN_A", "GITHUB_TOKEN_B"]
            .into_iter()
            .map(|k| (k.to_string(), SecretValue::new(format!("{k}-value"))))
            .collect()
    }

    fn config() -> ProjectConfig {
        ProjectConfig::from_yaml(PROJECT).unwrap()
    }

    fn config_errors(result: Result<Project>) -> Vec<ConfigError> {
        match result {
            Err(Error::Configuration(errors)) => errors.0,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("configuration unexpectedly valid"),
        }
    }

    #[test]
    fn test_assemble_full_project() {
        let project = assemble(config(), &secrets()).unwrap();

        let names: Vec<_> = project.builders().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "C++ Test ursa-1 amd64-ubuntu-18.04-cpp",
                "C++ Test ursa-2 amd64-ubuntu-18.04-cpp",
                "Python Test ursa-1 amd64-conda-python-3.7",
                "Python Test ursa-2 amd64-conda-python-3.7",
            ]
        );

        let cpp = project.scheduler("cpp-changes").unwrap();
        assert_eq!(cpp.builders.len(), 2);
        let pull = ChangeEvent::new("arrow", Category::Pull).with_files(["cpp/src/arrow/array.cc"]);
        assert!(cpp.fires_on(&pull));

        let force = project.scheduler("force").unwrap();
        assert_eq!(
            force.builders,
            vec![
                "C++ Test ursa-2 amd64-ubuntu-18.04-cpp",
                "Python Test ursa-2 amd64-conda-python-3.7",
            ]
        );

        assert!(project.scheduler("nightly").unwrap().is_periodic());
        assert_eq!(project.reporters[0].tokens.len(), 2);
        assert!(
            project
                .workers
                .get("ursa-1")
                .and_then(|w| w.credential.as_ref())
                .is_some()
        );
        assert!(project.secret_values().contains(&"GITHUB_TOKEN_A-value".to_string()));
    }

    #[test]
    fn test_dangling_references_fail_whole_project() {
        let mut config = config();
        config.schedulers[0].builders.push("Java Test".into());
        config.schedulers[2].workers = Some(vec!["ursa-9".into()]);
        config.reporters[0].credentials.push("MISSING".into());

        let errors = config_errors(assemble(config, &secrets()));
        assert!(errors.contains(&ConfigError::UnknownBuilder {
            owner: "cpp-changes".into(),
            builder: "Java Test".into()
        }));
        assert!(errors.contains(&ConfigError::UnknownWorker {
            owner: "force".into(),
            worker: "ursa-9".into()
        }));
        assert!(errors.contains(&ConfigError::UnknownCredential {
            reporter: "github-status".into(),
            credential: "MISSING".into()
        }));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut config = config();
        let duplicate = config.schedulers[0].clone();
        config.schedulers.push(duplicate);
        let env = config.environments[0].clone();
        config.environments.push(env);

        let errors = config_errors(assemble(config, &secrets()));
        assert!(errors.contains(&ConfigError::DuplicateScheduler("cpp-changes".into())));
        assert!(errors.contains(&ConfigError::DuplicateEnvironment(
            "amd64-ubuntu-18.04-cpp".into()
        )));
    }

    #[test]
    fn test_malformed_matcher_and_cadence() {
        let mut config = config();
        config.schedulers[0].matcher = Some(MatcherSpec::Paths(vec!["cpp/{a,b}".into()]));
        config.schedulers[1].cadence = Some(Cadence::daily(25, 0));

        let errors = config_errors(assemble(config, &secrets()));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidGlob { .. })));
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ConfigError::InvalidCadence { scheduler, .. } if scheduler == "nightly"))
        );
    }

    #[test]
    fn test_missing_secrets_are_reported() {
        let errors = config_errors(assemble(config(), &BTreeMap::new()));
        assert_eq!(
            errors
                .iter()
                .filter(|e| matches!(e, ConfigError::UnknownCredential { .. }))
                .count(),
            3
        );
    }
}
