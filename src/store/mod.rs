//! Task store: the only shared state between workers
//!
//! Claims never return errors. A lost race and an infrastructure fault both
//! come back as `None`; the difference is only visible through [`StoreStats`].

pub mod memory;
pub mod postgres;

use crate::db::models::{Task, TaskStatus};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

pub use memory::MemoryTaskStore;
pub use postgres::PgTaskStore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Reclaim one in-progress task whose lease expired, refreshing its heartbeat
    async fn claim_timed_out_task(&self) -> Option<Task>;

    /// Claim one pending task, moving it to in-progress
    async fn claim_fresh_task(&self) -> Option<Task>;

    /// Record the outcome of a task
    async fn finalize(&self, task_id: &str, result: Option<&str>, status: TaskStatus)
        -> Result<()>;

    fn stats(&self) -> StoreStatsSnapshot;
}

/// Claim counters kept by a store
#[derive(Debug, Default)]
pub struct StoreStats {
    claims: AtomicU64,
    conflicts: AtomicU64,
    faults: AtomicU64,
    rejected: AtomicU64,
}

impl StoreStats {
    pub fn record_claim(&self) {
        self.claims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            claims: self.claims.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StoreStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    /// Successful claims and reclaims
    pub claims: u64,
    /// Claims lost to a concurrent transaction
    pub conflicts: u64,
    /// Connection or query failures
    pub faults: u64,
    /// Claimed rows that failed validation and were marked failed
    pub rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_snapshot_counts() {
        let stats = StoreStats::default();
        stats.record_claim();
        stats.record_claim();
        stats.record_conflict();
        stats.record_fault();

        let snap = stats.snapshot();
        assert_eq!(snap.claims, 2);
        assert_eq!(snap.conflicts, 1);
        assert_eq!(snap.faults, 1);
        assert_eq!(snap.rejected, 0);
    }
}
