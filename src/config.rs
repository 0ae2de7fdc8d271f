//! Application configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `TPL_SPIDER_*` environment variables (nested keys split on `__`, e.g.
//! `TPL_SPIDER_MAIL__RELAY_URL`). The result is immutable and handed to each
//! component at startup.

use crate::error::{Result, SpiderError};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Config file looked up in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "tpl-spider.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TPL_SPIDER_";

/// User agent used when a task's agent class has no pool
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Order in which eligible rows are claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOrder {
    /// Latest submissions first (LIFO)
    #[default]
    NewestFirst,
    /// Head-of-line first (FIFO)
    OldestFirst,
}

impl ClaimOrder {
    /// SQL ordering keyword for `gmt_created`
    pub fn sql_direction(&self) -> &'static str {
        match self {
            ClaimOrder::NewestFirst => "DESC",
            ClaimOrder::OldestFirst => "ASC",
        }
    }
}

/// Crawler tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Page cap for full-site mode
    pub max_pages: usize,
    /// Linked resources (css/js/img) downloaded per page
    pub max_resources_per_page: usize,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            max_pages: 50,
            max_resources_per_page: 200,
        }
    }
}

/// Mail relay settings; notifications are log-only when `relay_url` is unset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub relay_url: Option<String>,
    pub api_key: Option<String>,
    pub sender: String,
    pub template_dir: PathBuf,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            sender: "noreply@template-spider.com".to_string(),
            template_dir: PathBuf::from("mail_templates"),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OS-level workers (threads)
    pub workers: usize,
    /// Cooperative loops per worker
    pub loops_per_worker: usize,
    /// Sleep when both claim queries come back empty
    pub poll_interval_secs: u64,
    /// Age of `gmt_modified` after which an in-progress task is reclaimable
    pub lease_secs: u64,
    /// Deadline for a single crawl
    pub max_run_secs: u64,
    pub claim_order: ClaimOrder,
    pub default_user_agent: String,
    /// Agent class -> pool of user-agent strings
    pub user_agents: HashMap<String, Vec<String>>,
    /// Six-field cron expression (sec min hour dom mon dow), UTC
    pub cleanup_cron: String,
    pub cleanup_max_age_days: u64,
    pub template_temp_dir: String,
    pub template_archive_dir: String,
    /// Connections per worker pool; each loop holds at most one at a time
    pub db_max_connections: u32,
    pub crawler: CrawlerSettings,
    pub mail: MailSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut user_agents = HashMap::new();
        user_agents.insert(
            "pc".to_string(),
            vec![
                DEFAULT_USER_AGENT.to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            ],
        );
        user_agents.insert(
            "mobile".to_string(),
            vec![
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1".to_string(),
                "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36".to_string(),
            ],
        );

        Self {
            workers: 2,
            loops_per_worker: 1,
            poll_interval_secs: 5,
            lease_secs: 600,
            max_run_secs: 480,
            claim_order: ClaimOrder::default(),
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            user_agents,
            cleanup_cron: "0 0 3 * * *".to_string(),
            cleanup_max_age_days: 3,
            template_temp_dir: "template_temp".to_string(),
            template_archive_dir: "template_archive".to_string(),
            db_max_connections: 2,
            crawler: CrawlerSettings::default(),
            mail: MailSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// An explicitly given `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(SpiderError::ConfigError(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
            }
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the worker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SpiderError::ConfigError("workers must be at least 1".to_string()));
        }
        if self.loops_per_worker == 0 {
            return Err(SpiderError::ConfigError(
                "loops_per_worker must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(SpiderError::ConfigError(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.lease_secs == 0 || self.max_run_secs == 0 {
            return Err(SpiderError::ConfigError(
                "lease_secs and max_run_secs must be positive".to_string(),
            ));
        }
        if self.template_temp_dir == self.template_archive_dir {
            return Err(SpiderError::ConfigError(
                "template_temp_dir and template_archive_dir must differ".to_string(),
            ));
        }
        if self.max_run_secs >= self.lease_secs {
            warn!(
                "max_run_secs ({}) >= lease_secs ({}): running crawls may be reclaimed by another worker",
                self.max_run_secs, self.lease_secs
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }

    /// Working directory root for in-flight crawls
    pub fn temp_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.template_temp_dir)
    }

    /// Directory holding finished template archives
    pub fn archive_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.template_archive_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.max_run() < config.lease());
        assert_eq!(config.claim_order, ClaimOrder::NewestFirst);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = AppConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SpiderError::ConfigError(_))));
    }

    #[test]
    fn same_temp_and_archive_dir_rejected() {
        let config = AppConfig {
            template_archive_dir: "template_temp".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn claim_order_direction() {
        assert_eq!(ClaimOrder::NewestFirst.sql_direction(), "DESC");
        assert_eq!(ClaimOrder::OldestFirst.sql_direction(), "ASC");
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/tpl-spider.toml")));
        assert!(matches!(result, Err(SpiderError::ConfigError(_))));
    }

    #[test]
    fn load_merges_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spider.toml");
        std::fs::write(
            &path,
            r#"
workers = 4
poll_interval_secs = 2
claim_order = "oldest_first"

[user_agents]
bot = ["TestBot/1.0"]

[mail]
sender = "ops@example.com"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.claim_order, ClaimOrder::OldestFirst);
        assert_eq!(config.user_agents.get("bot").unwrap(), &vec!["TestBot/1.0".to_string()]);
        assert_eq!(config.mail.sender, "ops@example.com");
        // untouched keys keep their defaults
        assert_eq!(config.lease_secs, 600);
    }

    #[test]
    fn dirs_are_joined_under_base() {
        let config = AppConfig::default();
        let base = Path::new("/data/spider");
        assert_eq!(config.temp_dir(base), PathBuf::from("/data/spider/template_temp"));
        assert_eq!(config.archive_dir(base), PathBuf::from("/data/spider/template_archive"));
    }
}
