//! Worker configuration

use crate::config::{AppConfig, DEFAULT_USER_AGENT};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-loop worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name used in logs, e.g. `w0-1`
    pub worker_id: String,

    /// Poll interval when no tasks available
    pub poll_interval: Duration,

    /// Deadline for a single crawl
    pub max_run: Duration,

    /// Scratch directory root; each task gets `<temp_dir>/<task id>`
    pub temp_dir: PathBuf,

    /// Where finished archives go
    pub archive_dir: PathBuf,

    /// Fallback user agent
    pub default_user_agent: String,

    /// Agent class -> user-agent pool
    pub user_agents: HashMap<String, Vec<String>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker".to_string(),
            poll_interval: Duration::from_secs(5),
            max_run: Duration::from_secs(480),
            temp_dir: PathBuf::from("template_temp"),
            archive_dir: PathBuf::from("template_archive"),
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            user_agents: HashMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Derive the loop configuration from the application config
    pub fn from_app(app: &AppConfig, base_dir: &Path) -> Self {
        Self {
            worker_id: "worker".to_string(),
            poll_interval: app.poll_interval(),
            max_run: app.max_run(),
            temp_dir: app.temp_dir(base_dir),
            archive_dir: app.archive_dir(base_dir),
            default_user_agent: app.default_user_agent.clone(),
            user_agents: app.user_agents.clone(),
        }
    }

    /// Same configuration under another worker id
    pub fn with_worker_id(&self, worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..self.clone()
        }
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn worker_id(mut self, id: &str) -> Self {
        self.config.worker_id = id.to_string();
        self
    }

    /// Set poll interval
    pub fn poll_interval(mut self, duration: Duration) -> Self {
        self.config.poll_interval = duration;
        self
    }

    /// Set poll interval in seconds
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval = Duration::from_secs(secs);
        self
    }

    /// Set crawl deadline
    pub fn max_run(mut self, duration: Duration) -> Self {
        self.config.max_run = duration;
        self
    }

    /// Set temp and archive directories under `base_dir`
    pub fn output_dirs(mut self, temp_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = temp_dir.into();
        self.config.archive_dir = archive_dir.into();
        self
    }

    pub fn default_user_agent(mut self, ua: &str) -> Self {
        self.config.default_user_agent = ua.to_string();
        self
    }

    /// Add a user-agent pool for an agent class
    pub fn user_agent_pool(mut self, class: &str, pool: Vec<String>) -> Self {
        self.config.user_agents.insert(class.to_string(), pool);
        self
    }

    /// Build the config
    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = WorkerConfig::builder()
            .worker_id("w1-0")
            .poll_interval_secs(2)
            .max_run(Duration::from_secs(30))
            .user_agent_pool("pc", vec!["A".to_string()])
            .build();

        assert_eq!(config.worker_id, "w1-0");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_run, Duration::from_secs(30));
        assert_eq!(config.user_agents["pc"], vec!["A".to_string()]);
        assert_eq!(config.default_user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn from_app_resolves_dirs_under_base() {
        let app = AppConfig::default();
        let config = WorkerConfig::from_app(&app, Path::new("/srv/spider"));
        assert_eq!(config.temp_dir, PathBuf::from("/srv/spider/template_temp"));
        assert_eq!(config.archive_dir, PathBuf::from("/srv/spider/template_archive"));
        assert_eq!(config.poll_interval, app.poll_interval());
        assert_eq!(config.with_worker_id("w3-0").worker_id, "w3-0");
    }
}
