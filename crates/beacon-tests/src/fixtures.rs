//! Test fixtures for creating sample projects and changes.

use beacon_core::change::{COMMAND_ARGS_PROPERTY, COMMAND_PROPERTY, Category, ChangeEvent};
use beacon_core::secrets::SecretValue;
use beacon_scheduler::{Project, ProjectConfig, assemble};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

pub const WEBHOOK_SECRET: &str = "hook-secret";
pub const TOKEN_A: &str = "token-a-value";
pub const TOKEN_B: &str = "token-b-value";

/// Two workers, a C++ and a Python environment, one reactive, one periodic
/// and one manual scheduler, and a commit status reporter.
pub const PROJECT: &str = r#"
name: arrow
repo: apache/arrow
url: https://github.com/apache/arrow
bot_handle: ursabot
workers:
  - name: ursa-1
    max_builds: 2
  - name: ursa-2
    max_builds: 2
environments:
  - name: ubuntu-cpp
    tags: [cpp]
    image: { repository: beacon/ubuntu-cpp }
  - name: conda-python
    tags: [python]
    image: { repository: beacon/conda-python }
templates:
  - name: C++
    tags: [cpp]
    steps:
      - name: build
        command: [ninja, "-C", "${{ props.BUILD_DIR || build }}"]
  - name: Python
    tags: [python]
    steps:
      - name: test
        command: [pytest, pyarrow]
schedulers:
  - name: cpp
    kind: reactive
    matcher:
      any:
        - all:
            - category: [pull, none]
            - paths: ["cpp/*"]
        - all:
            - category: [comment]
            - property: { key: command, value: build }
    builders: [C++]
  - name: nightly
    kind: periodic
    cadence: { hour: 3 }
    builders: [Python]
    properties:
      date: { date: "%Y-%m-%d" }
  - name: manual
    kind: manual
    builders: [C++, Python]
reporters:
  - name: github-status
    kind: status
    credentials: [GITHUB_TOKEN_A, GITHUB_TOKEN_B]
    report_on: [failure, success]
    context: beacon
server:
  webhook_secret: WEBHOOK_SECRET
"#;

pub const CPP_URSA_1: &str = "C++ ursa-1 ubuntu-cpp";
pub const CPP_URSA_2: &str = "C++ ursa-2 ubuntu-cpp";

/// Credentials referenced by [`PROJECT`].
pub fn secrets() -> BTreeMap<String, SecretValue> {
    [
        ("WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("GITHUB_TOKEN_A", TOKEN_A),
        ("GITHUB_TOKEN_B", TOKEN_B),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), SecretValue::new(value)))
    .collect()
}

/// Factory for assembled test projects.
pub struct ProjectFixture;

impl ProjectFixture {
    pub fn config() -> ProjectConfig {
        ProjectConfig::from_yaml(PROJECT).expect("Fixture project does not parse")
    }

    pub fn arrow() -> Project {
        Self::from_config(Self::config())
    }

    pub fn from_config(config: ProjectConfig) -> Project {
        assemble(config, &secrets()).expect("Fixture project does not assemble")
    }
}

/// Factory for change events.
pub struct ChangeFixture;

impl ChangeFixture {
    /// A push to master touching C++ sources.
    pub fn push_cpp(revision: &str) -> ChangeEvent {
        ChangeEvent::new("arrow", Category::Untagged)
            .with_repository("https://github.com/apache/arrow.git")
            .with_branch("master")
            .with_revision(revision)
            .with_files(["cpp/src/arrow/array.cc", "cpp/src/arrow/array.h"])
    }

    /// A push touching Python sources only.
    pub fn push_python(revision: &str) -> ChangeEvent {
        ChangeEvent::new("arrow", Category::Untagged)
            .with_branch("master")
            .with_revision(revision)
            .with_files(["python/pyarrow/array.pxi"])
    }

    /// A `@ursabot <command> <args>` comment on pull request `number`.
    pub fn comment(number: u64, command: &str, args: &str) -> ChangeEvent {
        ChangeEvent::new("arrow", Category::Comment)
            .with_branch(format!("refs/pull/{number}/merge"))
            .with_pull_request(number)
            .with_property(COMMAND_PROPERTY, command)
            .with_property(COMMAND_ARGS_PROPERTY, args)
    }
}

/// 2019-04-01 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 4, 1, hour, minute, 0)
        .single()
        .expect("valid fixture time")
}
