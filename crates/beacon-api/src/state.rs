//! Application state shared across handlers.

use beacon_core::ports::ChangedFiles;
use beacon_scheduler::{Dispatcher, Project};
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Lists pull request files for webhook deliveries that omit them.
    pub changed_files: Option<Arc<dyn ChangedFiles>>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            changed_files: None,
        }
    }

    pub fn with_changed_files(mut self, changed_files: Arc<dyn ChangedFiles>) -> Self {
        self.changed_files = Some(changed_files);
        self
    }

    pub fn project(&self) -> &Arc<Project> {
        self.dispatcher.project()
    }
}
