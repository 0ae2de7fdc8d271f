//! PostgreSQL task store

use crate::config::ClaimOrder;
use crate::db::models::{Task, TaskRow, TaskStatus};
use crate::db::{spider_tasks, DbPool};
use crate::error::{Result, SpiderError};
use crate::store::{StoreStats, StoreStatsSnapshot, TaskStore};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// SQLSTATE for serialization_failure and deadlock_detected
const CONTENTION_CODES: [&str; 2] = ["40001", "40P01"];

/// Malformed rows skipped within a single claim call
const MAX_REJECTED_PER_CLAIM: usize = 16;

/// Result of one claim transaction
#[derive(Debug)]
enum ClaimAttempt {
    Claimed(Task),
    Empty,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimKind {
    TimedOut,
    Fresh,
}

/// Task store backed by the spider_task table.
///
/// Every operation holds one pooled connection for one transaction and hands
/// it back on all exit paths; an uncommitted transaction rolls back on drop.
pub struct PgTaskStore {
    pool: DbPool,
    lease: Duration,
    order: ClaimOrder,
    stats: StoreStats,
}

impl PgTaskStore {
    pub fn new(pool: DbPool, lease: Duration, order: ClaimOrder) -> Self {
        Self {
            pool,
            lease,
            order,
            stats: StoreStats::default(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn claim(&self, kind: ClaimKind) -> Option<Task> {
        // A rejected row is already failed, so the next attempt sees the one after it
        for _ in 0..MAX_REJECTED_PER_CLAIM {
            match self.try_claim(kind).await {
                Ok(ClaimAttempt::Claimed(task)) => {
                    self.stats.record_claim();
                    return Some(task);
                }
                Ok(ClaimAttempt::Empty) => return None,
                Ok(ClaimAttempt::Rejected) => continue,
                Err(e) if is_contention(&e) => {
                    info!("Lost claim race ({:?}): {}", kind, e);
                    self.stats.record_conflict();
                    return None;
                }
                Err(e) => {
                    error!("Task store error during {:?} claim: {}", kind, e);
                    self.stats.record_fault();
                    return None;
                }
            }
        }

        warn!(
            "Rejected {} malformed tasks in one {:?} claim, backing off",
            MAX_REJECTED_PER_CLAIM, kind
        );
        None
    }

    async fn try_claim(&self, kind: ClaimKind) -> Result<ClaimAttempt> {
        let mut tx = self.pool.begin().await?;
        spider_tasks::set_repeatable_read(&mut tx).await?;

        let row: Option<TaskRow> = match kind {
            ClaimKind::TimedOut => {
                spider_tasks::claim_timed_out(&mut tx, self.lease, self.order).await?
            }
            ClaimKind::Fresh => spider_tasks::claim_pending(&mut tx, self.order).await?,
        };

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(ClaimAttempt::Empty);
        };

        let task_id = row.id.clone();
        match Task::try_from(row) {
            Ok(task) => {
                tx.commit().await?;
                debug!("Claimed task {} ({:?})", task.id, kind);
                Ok(ClaimAttempt::Claimed(task))
            }
            Err(e) => {
                // Fail the row now; otherwise its lease would expire and it
                // would be reclaimed forever.
                warn!("Rejecting malformed task {}: {}", task_id, e);
                spider_tasks::finalize(&mut tx, &task_id, None, TaskStatus::Failed).await?;
                tx.commit().await?;
                self.stats.record_rejected();
                Ok(ClaimAttempt::Rejected)
            }
        }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn claim_timed_out_task(&self) -> Option<Task> {
        self.claim(ClaimKind::TimedOut).await
    }

    async fn claim_fresh_task(&self) -> Option<Task> {
        self.claim(ClaimKind::Fresh).await
    }

    async fn finalize(
        &self,
        task_id: &str,
        result: Option<&str>,
        status: TaskStatus,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let updated = spider_tasks::finalize(&mut conn, task_id, result, status).await?;
        if updated == 0 {
            warn!("Finalize of task {} matched no row", task_id);
        }
        info!("Task {} finalized as {:?}", task_id, status);
        Ok(())
    }

    fn stats(&self) -> StoreStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Whether an error means another transaction got to the row first
pub fn is_contention(err: &SpiderError) -> bool {
    match err {
        SpiderError::DatabaseError(sqlx::Error::Database(db)) => db
            .code()
            .map(|code| CONTENTION_CODES.contains(&&*code))
            .unwrap_or(false),
        _ => false,
    }
}
