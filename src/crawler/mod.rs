//! Crawl collaborator: turns a task's seeds into a template archive
//!
//! The worker only sees [`CrawlerAdapter`]. [`TemplateCrawler`] is the default
//! implementation.

pub mod archive;
pub mod template;

use crate::config::CrawlerSettings;
use crate::db::models::{CrawlOptions, Task};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use template::TemplateCrawler;

/// Configuration for the web crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Connection timeout (default: 10 seconds)
    pub connect_timeout: Duration,
    /// Request timeout (default: 30 seconds)
    pub request_timeout: Duration,
    /// Maximum number of retry attempts (default: 3)
    pub max_retries: u32,
    /// Initial delay between retries (default: 1 second, doubles each retry)
    pub retry_base_delay: Duration,
    /// Maximum delay between retries (default: 10 seconds)
    pub retry_max_delay: Duration,
    /// Pages fetched in full-site mode
    pub max_pages: usize,
    pub max_resources_per_page: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self::from(&CrawlerSettings::default())
    }
}

impl From<&CrawlerSettings> for CrawlerConfig {
    fn from(settings: &CrawlerSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            max_retries: settings.max_retries,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            max_pages: settings.max_pages.max(1),
            max_resources_per_page: settings.max_resources_per_page,
        }
    }
}

/// Everything a crawl needs, resolved from a claimed task
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub task_id: String,
    pub seeds: Vec<String>,
    /// Scratch directory for this task; recreated on every attempt
    pub work_dir: PathBuf,
    /// Directory receiving `<task_id>.zip`
    pub archive_dir: PathBuf,
    pub headers: HashMap<String, String>,
    pub options: CrawlOptions,
}

impl CrawlRequest {
    /// Build the request for `task`. Output paths are keyed by task id so a
    /// task processed twice overwrites its own files.
    pub fn for_task(task: &Task, temp_root: &Path, archive_dir: &Path, user_agent: String) -> Self {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), user_agent);

        Self {
            task_id: task.id.clone(),
            seeds: task.seeds.clone(),
            work_dir: temp_root.join(&task.id),
            archive_dir: archive_dir.to_path_buf(),
            headers,
            options: task.options.clone(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(format!("{}.zip", self.task_id))
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("User-Agent").map(String::as_str)
    }
}

#[async_trait]
pub trait CrawlerAdapter: Send + Sync {
    /// Crawl the request's seeds and return the archive location.
    ///
    /// Implementations should stop early once `cancel` fires.
    async fn crawl(&self, request: CrawlRequest, cancel: CancellationToken) -> Result<PathBuf>;
}
