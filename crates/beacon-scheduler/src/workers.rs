//! Worker slot accounting.

use beacon_core::worker::{Worker, WorkerPool};
use std::collections::HashMap;

/// Tracks how many builds each worker is running against its `max_builds`.
#[derive(Debug, Default)]
pub struct WorkerSlots {
    capacity: HashMap<String, usize>,
    busy: HashMap<String, usize>,
}

impl WorkerSlots {
    pub fn new(pool: &WorkerPool) -> Self {
        Self {
            capacity: pool
                .iter()
                .map(|w: &Worker| (w.name.clone(), w.max_builds as usize))
                .collect(),
            busy: HashMap::new(),
        }
    }

    /// True if `worker` is known and has a free slot.
    pub fn available(&self, worker: &str) -> bool {
        self.capacity
            .get(worker)
            .is_some_and(|cap| self.busy(worker) < *cap)
    }

    /// Take a slot; returns false if the worker is full or unknown.
    pub fn acquire(&mut self, worker: &str) -> bool {
        if !self.available(worker) {
            return false;
        }
        *self.busy.entry(worker.to_string()).or_insert(0) += 1;
        true
    }

    pub fn release(&mut self, worker: &str) {
        if let Some(count) = self.busy.get_mut(worker) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn busy(&self, worker: &str) -> usize {
        self.busy.get(worker).copied().unwrap_or(0)
    }
}
