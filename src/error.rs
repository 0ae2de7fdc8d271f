//! Error types for tpl-spider

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpiderError {
    #[error("Failed to fetch URL: {url}")]
    FetchError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for URL: {url}")]
    HttpStatusError { url: String, status: u16 },

    #[error("Failed to fetch URL after {attempts} attempts: {url} (last error: {last_error})")]
    RetryExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Task has no seeds: {0}")]
    NoSeeds(String),

    #[error("Invalid task row {id}: {reason}")]
    InvalidTask { id: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("File system error")]
    FsError(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Worker startup failed: {0}")]
    StartupError(String),

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Task timeout")]
    TaskTimeout,
}

impl From<figment::Error> for SpiderError {
    fn from(e: figment::Error) -> Self {
        SpiderError::ConfigError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SpiderError>;
