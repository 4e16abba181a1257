//! In-memory job store.

use async_trait::async_trait;
use beacon_core::Result;
use beacon_core::ids::JobId;
use beacon_core::job::Job;
use beacon_core::ports::JobStore;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Job history kept in process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    async fn newest_first(&self, filter: impl Fn(&Job) -> bool, limit: usize) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut selected: Vec<Job> = jobs.values().filter(|j| filter(j)).cloned().collect();
        selected.sort_by(|a, b| (b.queued_at, b.id).cmp(&(a.queued_at, a.id)));
        selected.truncate(limit);
        selected
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.newest_first(|_| true, limit).await)
    }

    async fn list_by_builder(&self, builder: &str, limit: usize) -> Result<Vec<Job>> {
        Ok(self.newest_first(|j| j.builder == builder, limit).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::change::{Category, ChangeEvent};
    use beacon_core::job::{JobStatus, TriggerKind};
    use std::collections::BTreeMap;

    fn job(builder: &str) -> Job {
        Job::new(
            builder,
            "test",
            TriggerKind::Manual,
            ChangeEvent::new("arrow", Category::Untagged),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_save_overwrites_and_lists_newest_first() {
        let store = MemoryJobStore::new();
        let mut first = job("A");
        let second = job("B");
        let third = job("A");

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        store.save(&third).await.unwrap();

        first.transition(JobStatus::Running).unwrap();
        store.save(&first).await.unwrap();
        assert_eq!(store.len().await, 3);
        assert_eq!(
            store.get(first.id).await.unwrap().map(|j| j.status),
            Some(JobStatus::Running)
        );

        let recent: Vec<_> = store.list_recent(2).await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(recent, vec![third.id, second.id]);

        let by_builder: Vec<_> = store
            .list_by_builder("A", 10)
            .await
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(by_builder, vec![third.id, first.id]);
    }
}
