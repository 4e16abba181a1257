//! Dispatch queue for pending jobs.
//!
//! Jobs wait per builder in submission order. `poll` serves the oldest
//! pending job among builders that still have a free slot, so a busy builder
//! never holds back the others and no builder starves.

use beacon_core::ids::{Fingerprint, JobId};
use beacon_core::job::{Job, TriggerKind};
use std::collections::{HashMap, HashSet, VecDeque};

/// Default number of job fingerprints remembered for de-duplication.
pub const DEFAULT_DEDUP_CAPACITY: usize = 1024;

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// An identical job was seen recently; nothing was queued.
    Duplicate,
}

#[derive(Debug)]
struct QueuedJob {
    seq: u64,
    job: Job,
}

/// Bounded memory of recently enqueued job fingerprints, oldest evicted first.
#[derive(Debug)]
struct RecentFingerprints {
    capacity: usize,
    order: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
}

impl RecentFingerprints {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Returns false when the fingerprint is already remembered.
    fn insert(&mut self, fingerprint: &Fingerprint) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.members.insert(fingerprint.clone()) {
            return false;
        }
        self.order.push_back(fingerprint.clone());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    fn forget(&mut self, fingerprint: &Fingerprint) {
        if self.members.remove(fingerprint) {
            self.order.retain(|f| f != fingerprint);
        }
    }
}

/// Queue of jobs waiting for a worker slot.
#[derive(Debug)]
pub struct DispatchQueue {
    pending: HashMap<String, VecDeque<QueuedJob>>,
    running: HashMap<String, usize>,
    ceilings: HashMap<String, usize>,
    recent: RecentFingerprints,
    next_seq: u64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::with_dedup_capacity(DEFAULT_DEDUP_CAPACITY)
    }

    pub fn with_dedup_capacity(capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            running: HashMap::new(),
            ceilings: HashMap::new(),
            recent: RecentFingerprints::new(capacity),
            next_seq: 0,
        }
    }

    /// Set how many jobs of one builder may run at once. Builders without an
    /// explicit ceiling run one job at a time.
    pub fn set_ceiling(&mut self, builder: impl Into<String>, ceiling: usize) {
        self.ceilings.insert(builder.into(), ceiling.max(1));
    }

    /// Add a job. Only change-triggered jobs are checked for duplicates;
    /// manual and periodic jobs always queue.
    pub fn enqueue(&mut self, job: Job) -> Enqueued {
        if job.trigger == TriggerKind::Change && !self.recent.insert(&job.fingerprint) {
            return Enqueued::Duplicate;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending
            .entry(job.builder.clone())
            .or_default()
            .push_back(QueuedJob { seq, job });
        Enqueued::Queued
    }

    /// Next job that may start, marking its builder slot as taken.
    pub fn poll(&mut self) -> Option<Job> {
        self.poll_where(|_| true)
    }

    /// Like [`poll`](Self::poll), restricted to jobs accepted by `ready`
    /// (typically a free worker slot check).
    pub fn poll_where(&mut self, ready: impl Fn(&Job) -> bool) -> Option<Job> {
        let builder = self
            .pending
            .iter()
            .filter_map(|(builder, jobs)| jobs.front().map(|front| (builder, front)))
            .filter(|(builder, front)| self.has_slot(builder) && ready(&front.job))
            .min_by_key(|(_, front)| front.seq)
            .map(|(builder, _)| builder.clone())?;

        let jobs = self.pending.get_mut(&builder)?;
        let queued = jobs.pop_front()?;
        if jobs.is_empty() {
            self.pending.remove(&builder);
        }
        *self.running.entry(builder).or_insert(0) += 1;
        Some(queued.job)
    }

    /// Free the slot held by a finished job of `builder`.
    pub fn complete(&mut self, builder: &str) {
        if let Some(count) = self.running.get_mut(builder) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.running.remove(builder);
            }
        }
    }

    /// Put back a job returned by [`poll`](Self::poll) that could not be
    /// started. It frees the slot `poll` took and goes back to the head of
    /// its builder's queue.
    pub fn requeue(&mut self, job: Job) {
        self.complete(&job.builder);
        let jobs = self.pending.entry(job.builder.clone()).or_default();
        let seq = jobs.front().map_or(0, |front| front.seq.saturating_sub(1));
        jobs.push_front(QueuedJob { seq, job });
    }

    /// Remove a pending job. Its fingerprint is forgotten so the same change
    /// can trigger it again.
    pub fn cancel(&mut self, job_id: JobId) -> Option<Job> {
        let (builder, index) = self.pending.iter().find_map(|(builder, jobs)| {
            jobs.iter()
                .position(|q| q.job.id == job_id)
                .map(|index| (builder.clone(), index))
        })?;

        let jobs = self.pending.get_mut(&builder)?;
        let queued = jobs.remove(index)?;
        if jobs.is_empty() {
            self.pending.remove(&builder);
        }
        self.recent.forget(&queued.job.fingerprint);
        Some(queued.job)
    }

    /// Number of pending jobs.
    pub fn depth(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of running jobs of a builder.
    pub fn running(&self, builder: &str) -> usize {
        self.running.get(builder).copied().unwrap_or(0)
    }

    /// Position of a pending job within its builder's queue.
    pub fn position(&self, job_id: JobId) -> Option<usize> {
        self.pending
            .values()
            .find_map(|jobs| jobs.iter().position(|q| q.job.id == job_id))
    }

    fn has_slot(&self, builder: &str) -> bool {
        let ceiling = self.ceilings.get(builder).copied().unwrap_or(1);
        self.running(builder) < ceiling
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::change::{Category, ChangeEvent};
    use std::collections::BTreeMap;

    fn job(builder: &str, revision: &str) -> Job {
        Job::new(
            builder,
            "test",
            TriggerKind::Change,
            ChangeEvent::new("arrow", Category::Pull).with_revision(revision),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_fifo_per_builder_with_ceiling() {
        let mut queue = DispatchQueue::new();
        let first = job("A", "r1");
        let second = job("A", "r2");
        let (first_id, second_id) = (first.id, second.id);

        queue.enqueue(first);
        queue.enqueue(second);
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.position(second_id), Some(1));

        assert_eq!(queue.poll().map(|j| j.id), Some(first_id));
        // ceiling of one: the second job waits for the first to finish
        assert!(queue.poll().is_none());
        assert_eq!(queue.running("A"), 1);

        queue.complete("A");
        assert_eq!(queue.poll().map(|j| j.id), Some(second_id));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_busy_builder_does_not_block_others() {
        let mut queue = DispatchQueue::new();
        queue.enqueue(job("A", "r1"));
        queue.enqueue(job("A", "r2"));
        queue.enqueue(job("B", "r3"));

        assert_eq!(queue.poll().map(|j| j.builder), Some("A".to_string()));
        assert_eq!(queue.poll().map(|j| j.builder), Some("B".to_string()));
        assert!(queue.poll().is_none());
    }

    #[test]
    fn test_higher_ceiling() {
        let mut queue = DispatchQueue::new();
        queue.set_ceiling("A", 2);
        queue.enqueue(job("A", "r1"));
        queue.enqueue(job("A", "r2"));

        assert!(queue.poll().is_some());
        assert!(queue.poll().is_some());
        assert_eq!(queue.running("A"), 2);
    }

    #[test]
    fn test_duplicate_jobs_are_dropped() {
        let mut queue = DispatchQueue::new();
        assert_eq!(queue.enqueue(job("A", "r1")), Enqueued::Queued);
        assert_eq!(queue.enqueue(job("A", "r1")), Enqueued::Duplicate);
        assert_eq!(queue.enqueue(job("B", "r1")), Enqueued::Queued);
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn test_manual_jobs_bypass_dedup() {
        let mut queue = DispatchQueue::new();
        let mut manual = job("A", "r1");
        manual.trigger = TriggerKind::Manual;
        let mut again = manual.clone();
        again.id = JobId::new();

        assert_eq!(queue.enqueue(manual), Enqueued::Queued);
        assert_eq!(queue.enqueue(again), Enqueued::Queued);
    }

    #[test]
    fn test_periodic_jobs_bypass_dedup() {
        let mut queue = DispatchQueue::new();
        let mut periodic = job("A", "");
        periodic.trigger = TriggerKind::Periodic;
        let mut next_day = periodic.clone();
        next_day.id = JobId::new();

        assert_eq!(queue.enqueue(periodic), Enqueued::Queued);
        assert_eq!(queue.enqueue(next_day), Enqueued::Queued);
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn test_requeue_restores_head_and_slot() {
        let mut queue = DispatchQueue::new();
        let first = job("A", "r1");
        let first_id = first.id;
        queue.enqueue(first);
        queue.enqueue(job("A", "r2"));

        let polled = queue.poll().unwrap();
        assert_eq!(queue.running("A"), 1);
        queue.requeue(polled);

        assert_eq!(queue.running("A"), 0);
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.position(first_id), Some(0));
        assert_eq!(queue.poll().map(|j| j.id), Some(first_id));
    }

    #[test]
    fn test_dedup_memory_is_bounded() {
        let mut queue = DispatchQueue::with_dedup_capacity(1);
        assert_eq!(queue.enqueue(job("A", "r1")), Enqueued::Queued);
        assert_eq!(queue.enqueue(job("A", "r2")), Enqueued::Queued);
        // r1 was evicted by r2
        assert_eq!(queue.enqueue(job("A", "r1")), Enqueued::Queued);
    }

    #[test]
    fn test_cancel_pending() {
        let mut queue = DispatchQueue::new();
        let pending = job("A", "r1");
        let id = pending.id;
        queue.enqueue(pending);

        assert_eq!(queue.cancel(id).map(|j| j.id), Some(id));
        assert!(queue.cancel(id).is_none());
        assert_eq!(queue.depth(), 0);
        assert_eq!(queue.enqueue(job("A", "r1")), Enqueued::Queued);
    }
}
