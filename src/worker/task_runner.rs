//! Task runner - main worker loop

use crate::crawler::{CrawlRequest, CrawlerAdapter};
use crate::db::models::{Task, TaskStatus};
use crate::notifier::{notify_logged, Notification, Notifier};
use crate::store::TaskStore;
use crate::worker::{UserAgentPicker, WorkerConfig, WorkerDeps};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one pass through the loop did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Nothing to claim
    NoTask,
    /// Crawl succeeded and the task was finalized `Completed`
    Completed(String),
    /// Crawl failed or timed out and the task was finalized `Failed`
    Failed(String),
    /// Shutdown interrupted the crawl; the task stays in progress until its
    /// lease expires
    Abandoned(String),
}

/// Task runner that claims spider tasks and crawls them
pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    crawler: Arc<dyn CrawlerAdapter>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    user_agents: UserAgentPicker,
    shutdown: CancellationToken,
}

impl TaskRunner {
    /// Create a new task runner
    pub fn new(deps: WorkerDeps, config: WorkerConfig, shutdown: CancellationToken) -> Self {
        let user_agents =
            UserAgentPicker::new(config.user_agents.clone(), config.default_user_agent.clone());

        Self {
            store: deps.store,
            crawler: deps.crawler,
            notifier: deps.notifier,
            config,
            user_agents,
            shutdown,
        }
    }

    /// Get a handle to signal shutdown
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Main worker loop
    ///
    /// Claims and processes tasks until shutdown is signaled
    pub async fn run(&self) {
        let id = &self.config.worker_id;
        info!(worker = %id, "Starting worker loop");
        debug!(
            worker = %id,
            "Poll interval: {:?}, max run: {:?}",
            self.config.poll_interval, self.config.max_run
        );

        let mut seen_faults = self.store.stats().faults;

        loop {
            if self.shutdown.is_cancelled() {
                info!(worker = %id, "Shutdown signal received, stopping worker...");
                break;
            }

            match self.process_one_task().await {
                IterationOutcome::NoTask => {
                    let faults = self.store.stats().faults;
                    if faults > seen_faults {
                        warn!(
                            worker = %id,
                            "Task store reported {} faults since last poll",
                            faults - seen_faults
                        );
                    }
                    seen_faults = faults;

                    debug!(
                        worker = %id,
                        "No pending tasks, sleeping for {:?}", self.config.poll_interval
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
                IterationOutcome::Abandoned(_) => {}
                IterationOutcome::Completed(_) | IterationOutcome::Failed(_) => {
                    debug!(worker = %id, "Checking for next task...");
                }
            }
        }

        info!(worker = %id, "Worker stopped");
    }

    /// Claim one task, timed-out ones first, and process it
    pub async fn process_one_task(&self) -> IterationOutcome {
        let id = &self.config.worker_id;

        let task = match self.store.claim_timed_out_task().await {
            Some(task) => {
                info!(worker = %id, task_id = %task.id, "Reclaimed timed-out task");
                task
            }
            None => match self.store.claim_fresh_task().await {
                Some(task) => {
                    info!(worker = %id, task_id = %task.id, "Claimed task: {:?}", task.seeds);
                    task
                }
                None => return IterationOutcome::NoTask,
            },
        };

        self.process(task).await
    }

    /// Run once and exit (for testing)
    pub async fn run_once(&self) -> IterationOutcome {
        info!(worker = %self.config.worker_id, "Running worker in single-task mode...");
        self.process_one_task().await
    }

    async fn process(&self, task: Task) -> IterationOutcome {
        let id = &self.config.worker_id;
        let task_id = task.id.clone();

        let user_agent = self
            .user_agents
            .pick(task.options.user_agent_class.as_deref());
        let request = CrawlRequest::for_task(
            &task,
            &self.config.temp_dir,
            &self.config.archive_dir,
            user_agent,
        );

        let cancel = self.shutdown.child_token();
        let crawl = tokio::time::timeout(
            self.config.max_run,
            self.crawler.crawl(request, cancel.clone()),
        );

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                cancel.cancel();
                warn!(worker = %id, task_id = %task_id, "Shutdown during crawl, leaving task for lease expiry");
                return IterationOutcome::Abandoned(task_id);
            }
            result = crawl => result,
        };

        match result {
            Ok(Ok(archive)) => {
                let location = archive.to_string_lossy().into_owned();
                info!(worker = %id, task_id = %task_id, "Task completed: {}", location);

                if self.finalize(&task_id, Some(&location), TaskStatus::Completed).await {
                    self.notify_download(&task).await;
                }
                IterationOutcome::Completed(task_id)
            }
            Ok(Err(e)) => {
                error!(worker = %id, task_id = %task_id, "Task failed: {}", e);
                self.finalize(&task_id, None, TaskStatus::Failed).await;
                IterationOutcome::Failed(task_id)
            }
            Err(_) => {
                cancel.cancel();
                error!(
                    worker = %id,
                    task_id = %task_id,
                    "Task timed out after {:?}", self.config.max_run
                );
                self.finalize(&task_id, None, TaskStatus::Failed).await;
                IterationOutcome::Failed(task_id)
            }
        }
    }

    /// Write the outcome; a failed write leaves the task for lease expiry
    async fn finalize(&self, task_id: &str, result: Option<&str>, status: TaskStatus) -> bool {
        match self.store.finalize(task_id, result, status).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    worker = %self.config.worker_id,
                    task_id = %task_id,
                    "Failed to finalize task as {:?}: {}", status, e
                );
                false
            }
        }
    }

    async fn notify_download(&self, task: &Task) {
        let (Some(file_id), Some(email)) = (&task.options.file_id, &task.options.notify_email)
        else {
            debug!(task_id = %task.id, "No notification address, skipping mail");
            return;
        };

        let notification = Notification::download_ready(file_id, email);
        notify_logged(self.notifier.as_ref(), &notification).await;
    }
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                shutdown.cancel();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClaimOrder;
    use crate::crawler::CrawlRequest;
    use crate::db::models::{CrawlOptions, NewTask};
    use crate::error::{Result, SpiderError};
    use crate::store::MemoryTaskStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ArchiveCrawler;

    #[async_trait]
    impl CrawlerAdapter for ArchiveCrawler {
        async fn crawl(&self, request: CrawlRequest, _cancel: CancellationToken) -> Result<PathBuf> {
            Ok(request.archive_path())
        }
    }

    struct BrokenCrawler;

    #[async_trait]
    impl CrawlerAdapter for BrokenCrawler {
        async fn crawl(&self, request: CrawlRequest, _cancel: CancellationToken) -> Result<PathBuf> {
            Err(SpiderError::NoSeeds(request.task_id))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn runner(
        store: Arc<MemoryTaskStore>,
        crawler: Arc<dyn CrawlerAdapter>,
        notifier: Arc<RecordingNotifier>,
    ) -> TaskRunner {
        let config = WorkerConfig::builder()
            .worker_id("test")
            .output_dirs("/tmp/tpl/temp", "/tmp/tpl/archive")
            .build();
        let deps = WorkerDeps {
            store,
            crawler,
            notifier,
        };
        TaskRunner::new(deps, config, CancellationToken::new())
    }

    #[tokio::test]
    async fn success_finalizes_completed_and_notifies() {
        let store = Arc::new(MemoryTaskStore::new(Duration::from_secs(600), ClaimOrder::NewestFirst));
        store.insert(NewTask::new("t1", vec!["http://example.com".into()]).with_options(
            CrawlOptions {
                file_id: Some("f-1".into()),
                notify_email: Some("user@example.com".into()),
                ..Default::default()
            },
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let runner = runner(store.clone(), Arc::new(ArchiveCrawler), notifier.clone());

        assert_eq!(
            runner.run_once().await,
            IterationOutcome::Completed("t1".to_string())
        );

        let task = store.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("/tmp/tpl/archive/t1.zip"));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], Notification::download_ready("f-1", "user@example.com"));
    }

    #[tokio::test]
    async fn crawl_error_finalizes_failed_without_notification() {
        let store = Arc::new(MemoryTaskStore::new(Duration::from_secs(600), ClaimOrder::NewestFirst));
        store.insert(NewTask::new("t1", vec!["http://example.com".into()]).with_options(
            CrawlOptions {
                file_id: Some("f-1".into()),
                notify_email: Some("user@example.com".into()),
                ..Default::default()
            },
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let runner = runner(store.clone(), Arc::new(BrokenCrawler), notifier.clone());

        assert_eq!(runner.run_once().await, IterationOutcome::Failed("t1".to_string()));

        let task = store.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.result, None);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_store_reports_no_task() {
        let store = Arc::new(MemoryTaskStore::new(Duration::from_secs(600), ClaimOrder::NewestFirst));
        let runner = runner(store, Arc::new(ArchiveCrawler), Arc::new(RecordingNotifier::default()));
        assert_eq!(runner.run_once().await, IterationOutcome::NoTask);
    }

    #[tokio::test]
    async fn missing_address_skips_notification() {
        let store = Arc::new(MemoryTaskStore::new(Duration::from_secs(600), ClaimOrder::NewestFirst));
        store.insert(NewTask::new("t1", vec!["http://example.com".into()]));
        let notifier = Arc::new(RecordingNotifier::default());
        let runner = runner(store.clone(), Arc::new(ArchiveCrawler), notifier.clone());

        runner.run_once().await;
        assert_eq!(store.get("t1").unwrap().status, TaskStatus::Completed);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
