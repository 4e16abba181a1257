//! GitHub webhook payloads and their normalisation into change events.

use beacon_core::change::{COMMAND_ARGS_PROPERTY, COMMAND_PROPERTY, Category, ChangeEvent};
use beacon_core::{Error, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Check an `X-Hub-Signature-256` value (`sha256=<hex>`) against the body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    #[serde(default)]
    clone_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Default, Deserialize)]
struct Commit {
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Pusher {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: Repository,
    #[serde(default)]
    commits: Vec<Commit>,
    #[serde(default)]
    pusher: Option<Pusher>,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    head: GitRef,
    base: GitRef,
    user: User,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: u64,
    pull_request: PullRequest,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    /// Present only when the issue is a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Comment {
    id: u64,
    body: String,
    user: User,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    action: String,
    issue: Issue,
    comment: Comment,
    repository: Repository,
}

/// Inputs that shape how deliveries are normalised.
#[derive(Debug, Clone)]
pub struct WebhookContext<'a> {
    pub project: &'a str,
    pub repo: &'a str,
    pub bot_handle: &'a str,
}

/// Turn one delivery into a change event. `Ok(None)` means the delivery is
/// valid but carries nothing to build (unhandled event or action, branch
/// deletion, comment not addressed to the bot, other repository).
pub fn normalize(
    event: &str,
    body: &[u8],
    ctx: &WebhookContext<'_>,
) -> Result<Option<ChangeEvent>> {
    match event {
        "push" => normalize_push(parse(body)?, ctx),
        "pull_request" => normalize_pull_request(parse(body)?, ctx),
        "issue_comment" => normalize_comment(parse(body)?, ctx),
        _ => Ok(None),
    }
}

fn parse<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidPayload(e.to_string()))
}

fn same_repo(repository: &Repository, ctx: &WebhookContext<'_>) -> bool {
    repository.full_name.eq_ignore_ascii_case(ctx.repo)
}

fn base_change(ctx: &WebhookContext<'_>, category: Category, repository: &Repository) -> ChangeEvent {
    let mut change = ChangeEvent::new(ctx.project, category);
    change.repository = repository.clone_url.clone();
    change
}

fn normalize_push(payload: PushPayload, ctx: &WebhookContext<'_>) -> Result<Option<ChangeEvent>> {
    if payload.deleted || payload.after.bytes().all(|b| b == b'0') || !same_repo(&payload.repository, ctx) {
        return Ok(None);
    }

    let (category, branch) = match payload.git_ref.strip_prefix("refs/tags/") {
        Some(_) => (Category::Tag, payload.git_ref.clone()),
        None => (
            Category::Untagged,
            payload
                .git_ref
                .strip_prefix("refs/heads/")
                .unwrap_or(&payload.git_ref)
                .to_string(),
        ),
    };

    let files = payload
        .commits
        .iter()
        .flat_map(|c| c.added.iter().chain(&c.removed).chain(&c.modified))
        .cloned();

    let mut change = base_change(ctx, category, &payload.repository)
        .with_branch(branch)
        .with_revision(payload.after)
        .with_files(files);
    change.author = payload.pusher.map(|p| p.name);
    Ok(Some(change))
}

fn normalize_pull_request(
    payload: PullRequestPayload,
    ctx: &WebhookContext<'_>,
) -> Result<Option<ChangeEvent>> {
    if !matches!(payload.action.as_str(), "opened" | "synchronize" | "reopened")
        || !same_repo(&payload.repository, ctx)
    {
        return Ok(None);
    }

    let pr = payload.pull_request;
    let change = base_change(ctx, Category::Pull, &payload.repository)
        .with_branch(format!("refs/pull/{}/merge", payload.number))
        .with_revision(pr.head.sha)
        .with_pull_request(payload.number)
        .with_author(pr.user.login)
        .with_property("base_branch", pr.base.git_ref)
        .with_property("head_branch", pr.head.git_ref);
    Ok(Some(change))
}

fn normalize_comment(
    payload: IssueCommentPayload,
    ctx: &WebhookContext<'_>,
) -> Result<Option<ChangeEvent>> {
    if payload.action != "created"
        || payload.issue.pull_request.is_none()
        || !same_repo(&payload.repository, ctx)
    {
        return Ok(None);
    }
    let Some((command, args)) = parse_command(&payload.comment.body, ctx.bot_handle) else {
        return Ok(None);
    };

    let number = payload.issue.number;
    let change = base_change(ctx, Category::Comment, &payload.repository)
        .with_branch(format!("refs/pull/{}/merge", number))
        .with_pull_request(number)
        .with_comment_id(payload.comment.id)
        .with_author(payload.comment.user.login)
        .with_property(COMMAND_PROPERTY, command)
        .with_property(COMMAND_ARGS_PROPERTY, args);
    Ok(Some(change))
}

/// Find the first line of `body` addressed to `@<bot>` and split it into
/// the command name and the remaining arguments.
pub fn parse_command(body: &str, bot: &str) -> Option<(String, String)> {
    let mention = format!("@{}", bot);
    body.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(&mention)?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let mut words = rest.split_whitespace();
        let command = words.next()?;
        Some((command.to_string(), words.collect::<Vec<_>>().join(" ")))
    })
}
