//! Per-thread collaborator construction

use crate::config::AppConfig;
use crate::crawler::{CrawlerAdapter, CrawlerConfig, TemplateCrawler};
use crate::db::create_lazy_pool;
use crate::error::Result;
use crate::notifier::{Notifier, OptionalNotifier};
use crate::store::{PgTaskStore, TaskStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Collaborators shared by the loops of one worker thread
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn TaskStore>,
    pub crawler: Arc<dyn CrawlerAdapter>,
    pub notifier: Arc<dyn Notifier>,
}

/// Builds a worker thread's collaborators.
///
/// Called once per thread, inside that thread's runtime, so connection pools
/// and HTTP clients are never shared across runtimes.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn build(&self, worker_index: usize) -> Result<WorkerDeps>;
}

/// Production wiring: Postgres store, template crawler, mail notifier.
///
/// A relative `mail.template_dir` is resolved against the working directory,
/// like the default config file.
pub struct PgWorkerFactory {
    database_url: String,
    app: Arc<AppConfig>,
}

impl PgWorkerFactory {
    pub fn new(database_url: impl Into<String>, app: Arc<AppConfig>) -> Self {
        Self {
            database_url: database_url.into(),
            app,
        }
    }
}

#[async_trait]
impl WorkerFactory for PgWorkerFactory {
    async fn build(&self, worker_index: usize) -> Result<WorkerDeps> {
        let pool = create_lazy_pool(&self.database_url, self.app.db_max_connections)?;
        let store = PgTaskStore::new(pool, self.app.lease(), self.app.claim_order);

        let crawler = TemplateCrawler::with_config(CrawlerConfig::from(&self.app.crawler))?;

        let notifier = OptionalNotifier::from_settings(&self.app.mail)?;

        info!(
            "Worker {} ready (mail {})",
            worker_index,
            if notifier.is_enabled() { "enabled" } else { "log-only" }
        );

        Ok(WorkerDeps {
            store: Arc::new(store),
            crawler: Arc::new(crawler),
            notifier: Arc::new(notifier),
        })
    }
}
