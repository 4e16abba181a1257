//! Change events observed on the source-control host.
//!
//! Every inbound occurrence (push, pull request update, comment command,
//! periodic tick, operator request) is normalised into a [`ChangeEvent`]
//! before it reaches the matchers.

use crate::ids::{ChangeId, Fingerprint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Property holding the command name of a comment-triggered change.
pub const COMMAND_PROPERTY: &str = "command";

/// Property holding the arguments following the command name.
pub const COMMAND_ARGS_PROPERTY: &str = "command_args";

/// Property naming the scheduler that produced a job.
pub const SCHEDULER_PROPERTY: &str = "scheduler";

/// Category tag of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A tag was pushed.
    Tag,
    /// A pull request was opened or updated.
    Pull,
    /// A comment addressed a command to the bot.
    Comment,
    /// No category tag present (plain branch push, synthetic events).
    #[serde(rename = "none")]
    Untagged,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tag => "tag",
            Category::Pull => "pull",
            Category::Comment => "comment",
            Category::Untagged => "none",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One externally observed change. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: ChangeId,
    pub project: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
    pub category: Category,
    #[serde(default)]
    pub files: BTreeSet<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub pull_request: Option<u64>,
    #[serde(default)]
    pub author: Option<String>,
    /// Host id of the comment that carried a bot command. Redeliveries keep
    /// it; a new comment gets a new one.
    #[serde(default)]
    pub comment_id: Option<u64>,
    pub received_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(project: impl Into<String>, category: Category) -> Self {
        Self {
            id: ChangeId::new(),
            project: project.into(),
            repository: None,
            branch: None,
            revision: None,
            category,
            files: BTreeSet::new(),
            properties: BTreeMap::new(),
            pull_request: None,
            author: None,
            comment_id: None,
            received_at: Utc::now(),
        }
    }

    /// A change with no file, branch or revision information, used for
    /// periodic and operator triggers.
    pub fn synthetic(project: impl Into<String>) -> Self {
        Self::new(project, Category::Untagged)
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_pull_request(mut self, number: u64) -> Self {
        self.pull_request = Some(number);
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_comment_id(mut self, id: u64) -> Self {
        self.comment_id = Some(id);
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Command name of a comment-triggered change.
    pub fn command(&self) -> Option<&str> {
        self.property(COMMAND_PROPERTY)
    }

    /// True for comment changes carrying a bot command.
    pub fn is_command(&self) -> bool {
        self.category == Category::Comment && self.command().is_some()
    }

    /// Content hash over project, branch, revision, category, comment id,
    /// files and properties. Two deliveries of the same change hash identically
    /// regardless of their ids or arrival times.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };

        field("project", &self.project);
        field("branch", self.branch.as_deref().unwrap_or(""));
        field("revision", self.revision.as_deref().unwrap_or(""));
        field("category", self.category.as_str());
        if let Some(id) = self.comment_id {
            field("comment", &id.to_string());
        }
        for file in &self.files {
            field("file", file);
        }
        for (key, value) in &self.properties {
            field("property.key", key);
            field("property.value", value);
        }

        Fingerprint::from_hex(hex::encode(hasher.finalize()))
    }
}
