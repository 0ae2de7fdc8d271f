//! Periodic cleanup of old crawl output using tokio-cron-scheduler.
//!
//! Runs independently of the task queue: once at startup, then on the
//! configured cron schedule, deleting entries in the temp and archive
//! directories that have not been modified for `max_age_days`.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// What one cleanup pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
    pub errors: usize,
}

/// Delete direct children of each directory older than `max_age`.
///
/// Missing directories are skipped. Failures on individual entries are
/// logged and counted, never fatal.
pub fn clean_stale_entries(max_age: Duration, dirs: &[PathBuf]) -> CleanupReport {
    let now = SystemTime::now();
    let mut report = CleanupReport::default();

    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cleanup skipping missing directory {}", dir.display());
                continue;
            }
            Err(e) => {
                warn!("Cleanup cannot read {}: {}", dir.display(), e);
                report.errors += 1;
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            match is_stale(&path, now, max_age) {
                Ok(true) => match remove_entry(&path) {
                    Ok(()) => {
                        debug!("Removed stale {}", path.display());
                        report.removed += 1;
                    }
                    Err(e) => {
                        warn!("Failed to remove {}: {}", path.display(), e);
                        report.errors += 1;
                    }
                },
                Ok(false) => report.kept += 1,
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    report.errors += 1;
                }
            }
        }
    }

    report
}

fn is_stale(path: &Path, now: SystemTime, max_age: Duration) -> std::io::Result<bool> {
    let modified = std::fs::symlink_metadata(path)?.modified()?;
    // Entries stamped in the future are treated as fresh
    Ok(now
        .duration_since(modified)
        .map(|age| age > max_age)
        .unwrap_or(false))
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

async fn run_cleanup(max_age: Duration, dirs: Vec<PathBuf>) {
    info!("Running cleanup of {} directories", dirs.len());
    match tokio::task::spawn_blocking(move || clean_stale_entries(max_age, &dirs)).await {
        Ok(report) => info!(
            "Cleanup complete: removed {}, kept {}, errors {}",
            report.removed, report.kept, report.errors
        ),
        Err(e) => error!("Cleanup task failed: {}", e),
    }
}

/// Run the cleanup once now, then start the cron schedule.
///
/// The returned scheduler must be kept alive for the schedule to keep firing.
pub async fn start_scheduler(
    cron: &str,
    max_age_days: u64,
    dirs: Vec<PathBuf>,
) -> Result<JobScheduler> {
    let max_age = Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY));

    run_cleanup(max_age, dirs.clone()).await;

    let scheduler = JobScheduler::new().await?;
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let dirs = dirs.clone();
        Box::pin(async move {
            run_cleanup(max_age, dirs).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!(
        "Cleanup scheduled with cron '{}' (max age {} days)",
        cron, max_age_days
    );
    Ok(scheduler)
}
