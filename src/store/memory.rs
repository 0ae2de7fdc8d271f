//! In-process task store with the same claim semantics as the Postgres one.
//!
//! Used by the test suite. A single mutex stands in for the database's row
//! locking, so claims are trivially mutually exclusive.

use crate::config::ClaimOrder;
use crate::db::models::{NewTask, Task, TaskStatus};
use crate::error::Result;
use crate::store::{StoreStats, StoreStatsSnapshot, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded status write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Default)]
struct Inner {
    tasks: Vec<Task>,
    history: Vec<StatusChange>,
}

pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
    lease: Duration,
    order: ClaimOrder,
    stats: StoreStats,
}

impl MemoryTaskStore {
    pub fn new(lease: Duration, order: ClaimOrder) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            lease,
            order,
            stats: StoreStats::default(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-written task
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a pending task created now
    pub fn insert(&self, task: NewTask) {
        let now = Utc::now();
        self.insert_task(Task {
            id: task.id,
            seeds: task.seeds,
            status: TaskStatus::Pending,
            options: task.options,
            created_at: now,
            modified_at: now,
            result: None,
        });
    }

    /// Add a task exactly as given
    pub fn insert_task(&self, task: Task) {
        self.lock().tasks.push(task);
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().tasks.iter().find(|t| t.id == task_id).cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    /// Every status write made through the store, in order
    pub fn history(&self) -> Vec<StatusChange> {
        self.lock().history.clone()
    }

    pub fn set_modified_at(&self, task_id: &str, at: DateTime<Utc>) {
        if let Some(task) = self.lock().tasks.iter_mut().find(|t| t.id == task_id) {
            task.modified_at = at;
        }
    }

    fn pick<'a>(&self, candidates: impl Iterator<Item = &'a mut Task>) -> Option<&'a mut Task> {
        match self.order {
            ClaimOrder::NewestFirst => candidates.max_by_key(|t| t.created_at),
            ClaimOrder::OldestFirst => candidates.min_by_key(|t| t.created_at),
        }
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn claim_timed_out_task(&self) -> Option<Task> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.lease)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut inner = self.lock();
        let task = self.pick(
            inner
                .tasks
                .iter_mut()
                .filter(|t| t.status == TaskStatus::InProgress && t.modified_at < cutoff),
        )?;
        task.modified_at = now;
        let claimed = task.clone();
        drop(inner);

        self.stats.record_claim();
        Some(claimed)
    }

    async fn claim_fresh_task(&self) -> Option<Task> {
        let now = Utc::now();

        let mut inner = self.lock();
        let task = self.pick(
            inner
                .tasks
                .iter_mut()
                .filter(|t| t.status == TaskStatus::Pending),
        )?;
        task.status = TaskStatus::InProgress;
        task.modified_at = now;
        let claimed = task.clone();
        inner.history.push(StatusChange {
            task_id: claimed.id.clone(),
            from: TaskStatus::Pending,
            to: TaskStatus::InProgress,
        });
        drop(inner);

        self.stats.record_claim();
        Some(claimed)
    }

    async fn finalize(
        &self,
        task_id: &str,
        result: Option<&str>,
        status: TaskStatus,
    ) -> Result<()> {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.iter_mut().find(|t| t.id == task_id) else {
            return Ok(());
        };
        let from = task.status;
        task.status = status;
        task.result = result.map(str::to_string);
        inner.history.push(StatusChange {
            task_id: task_id.to_string(),
            from,
            to: status,
        });
        Ok(())
    }

    fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryTaskStore {
        MemoryTaskStore::new(Duration::from_secs(600), ClaimOrder::NewestFirst)
    }

    fn pending(id: &str, created_at: DateTime<Utc>) -> Task {
        Task {
            id: id.to_string(),
            seeds: vec!["http://example.com".to_string()],
            status: TaskStatus::Pending,
            options: Default::default(),
            created_at,
            modified_at: created_at,
            result: None,
        }
    }

    #[tokio::test]
    async fn claim_fresh_on_empty_store_returns_none() {
        assert!(store().claim_fresh_task().await.is_none());
    }

    #[tokio::test]
    async fn claim_fresh_prefers_newest() {
        let store = store();
        let now = Utc::now();
        store.insert_task(pending("old", now - chrono::Duration::minutes(5)));
        store.insert_task(pending("new", now));

        assert_eq!(store.claim_fresh_task().await.unwrap().id, "new");
        assert_eq!(store.claim_fresh_task().await.unwrap().id, "old");
        assert!(store.claim_fresh_task().await.is_none());
    }

    #[tokio::test]
    async fn claim_fresh_oldest_first_when_configured() {
        let store = MemoryTaskStore::new(Duration::from_secs(600), ClaimOrder::OldestFirst);
        let now = Utc::now();
        store.insert_task(pending("old", now - chrono::Duration::minutes(5)));
        store.insert_task(pending("new", now));

        assert_eq!(store.claim_fresh_task().await.unwrap().id, "old");
    }

    #[tokio::test]
    async fn fresh_lease_is_not_reclaimable() {
        let store = store();
        store.insert(NewTask::new("t1", vec!["http://example.com".to_string()]));
        store.claim_fresh_task().await.unwrap();

        assert!(store.claim_timed_out_task().await.is_none());
    }

    #[tokio::test]
    async fn finalize_unknown_task_is_a_no_op() {
        let store = store();
        store
            .finalize("missing", Some("x.zip"), TaskStatus::Completed)
            .await
            .unwrap();
        assert!(store.history().is_empty());
    }
}
