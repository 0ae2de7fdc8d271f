//! tpl-spider - distributed worker for web-template crawl tasks
//!
//! Workers on any number of hosts share one PostgreSQL `spider_task` table.
//! Each worker claims pending tasks (or reclaims ones whose lease expired),
//! crawls the seeds into a zip archive bounded by a deadline, records the
//! outcome and mails the download link.
//!
//! The pieces:
//! - [`store`]: lease-based claims over the shared table
//! - [`worker`]: the claim/crawl/finalize loop and the thread pool running it
//! - [`crawler`]: fetching pages and resources into an archive
//! - [`notifier`]: download-link mail
//! - [`maintenance`]: scheduled cleanup of old output

pub mod config;
pub mod crawler;
pub mod db;
pub mod error;
pub mod maintenance;
pub mod notifier;
pub mod store;
pub mod worker;

pub use config::{AppConfig, ClaimOrder};
pub use crawler::{CrawlRequest, CrawlerAdapter, CrawlerConfig, TemplateCrawler};
pub use error::{Result, SpiderError};
pub use notifier::{MailNotifier, Notification, Notifier, OptionalNotifier};
pub use store::{MemoryTaskStore, PgTaskStore, TaskStore};
pub use worker::{TaskRunner, WorkerConfig, WorkerPool};
