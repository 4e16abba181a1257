//! Change matching, builder expansion and job dispatch for Beacon CI.

pub mod bus;
pub mod dispatcher;
pub mod factory;
pub mod glob;
pub mod matcher;
pub mod project;
pub mod queue;
pub mod schedulers;
pub mod store;
pub mod timer;
pub mod workers;

pub use dispatcher::{Dispatcher, ForceRequest};
pub use matcher::{Matcher, MatcherSpec};
pub use project::{Project, ProjectConfig, assemble};
pub use schedulers::{Cadence, Scheduler, SchedulerKind};
