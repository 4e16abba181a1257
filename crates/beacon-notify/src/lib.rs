//! Outward reporting for Beacon CI.
//!
//! Pushes job outcomes to GitHub as commit statuses and pull request
//! comments, rotating through a pool of API tokens to stay under the
//! per-token rate limit.

pub mod credentials;
pub mod formatters;
pub mod github;
pub mod reporter;
pub mod service;

pub use credentials::{Credential, CredentialPool, RateLimit};
pub use formatters::{BenchmarkFormatter, CrossbowFormatter, Formatter, SummaryFormatter};
pub use github::{CommitState, CommitStatus, GithubClient, NotifyError};
pub use reporter::{CommentReporter, ReportOutcome, Reporter, StatusReporter, create_reporter};
pub use service::ReportingService;
