//! Worker module for claiming and crawling spider tasks
//!
//! This module provides:
//! - TaskRunner: Worker loop that claims tasks and drives the crawl
//! - WorkerPool: Threads x loops topology
//! - WorkerFactory: Per-thread construction of store, crawler and notifier
//! - WorkerConfig: Configuration for a worker loop

pub mod config;
pub mod factory;
pub mod pool;
pub mod task_runner;
pub mod user_agent;

pub use config::WorkerConfig;
pub use factory::{PgWorkerFactory, WorkerDeps, WorkerFactory};
pub use pool::WorkerPool;
pub use task_runner::{setup_signal_handler, IterationOutcome, TaskRunner};
pub use user_agent::UserAgentPicker;
