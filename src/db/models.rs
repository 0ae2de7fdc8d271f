//! Database models for the spider_task table

use crate::error::SpiderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Raw spider_task row as stored. Validated into [`Task`] before use.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: String,
    pub seeds: String,
    pub ip: Option<String>,
    pub user_id_str: Option<String>,
    pub user_agent: Option<String>,
    pub status: String,
    pub is_grab_out_link: bool,
    pub to_single_page: bool,
    pub is_full_site: bool,
    pub is_ref_model: bool,
    pub encoding: Option<String>,
    pub to_framework: Option<String>,
    pub gmt_modified: DateTime<Utc>,
    pub gmt_created: DateTime<Utc>,
    pub file_id: Option<String>,
    pub result: Option<String>,
}

/// Task status; persisted as a single-letter code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn code(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "I",
            TaskStatus::InProgress => "P",
            TaskStatus::Completed => "C",
            TaskStatus::Failed => "E",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "I" => Some(TaskStatus::Pending),
            "P" => Some(TaskStatus::InProgress),
            "C" => Some(TaskStatus::Completed),
            "E" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Position in the forward-only lifecycle
    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle forward-only.
    /// Staying in place counts (reclaims and repeated finalizes).
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// Option bundle set at submission time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlOptions {
    /// Fetch resources hosted outside the seed's site
    pub grab_out_site_link: bool,
    pub to_single_page: bool,
    pub full_site: bool,
    pub ref_model: bool,
    pub encoding: Option<String>,
    pub to_framework: Option<String>,
    /// Agent class used to pick a user-agent pool
    pub user_agent_class: Option<String>,
    /// Destination identifier used in the download link
    pub file_id: Option<String>,
    /// Notification address
    pub notify_email: Option<String>,
    pub client_ip: Option<String>,
}

/// A validated spider task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub seeds: Vec<String>,
    pub status: TaskStatus,
    pub options: CrawlOptions,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub result: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = SpiderError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| SpiderError::InvalidTask {
            id: row.id.clone(),
            reason,
        };

        let status = TaskStatus::from_code(&row.status)
            .ok_or_else(|| invalid(format!("unknown status code '{}'", row.status)))?;

        let seeds: Vec<String> = serde_json::from_str(&row.seeds)
            .map_err(|e| invalid(format!("seeds are not a JSON string array: {}", e)))?;
        let seeds: Vec<String> = seeds
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if seeds.is_empty() {
            return Err(invalid("seed list is empty".to_string()));
        }

        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        Ok(Task {
            id: row.id.clone(),
            seeds,
            status,
            options: CrawlOptions {
                grab_out_site_link: row.is_grab_out_link,
                to_single_page: row.to_single_page,
                full_site: row.is_full_site,
                ref_model: row.is_ref_model,
                encoding: non_empty(row.encoding),
                to_framework: non_empty(row.to_framework),
                user_agent_class: non_empty(row.user_agent),
                file_id: non_empty(row.file_id),
                notify_email: non_empty(row.user_id_str),
                client_ip: non_empty(row.ip),
            },
            created_at: row.gmt_created,
            modified_at: row.gmt_modified,
            result: row.result,
        })
    }
}

/// NewTask - For inserting new tasks (submission path, tests and tooling)
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub seeds: Vec<String>,
    pub options: CrawlOptions,
}

impl NewTask {
    pub fn new(id: impl Into<String>, seeds: Vec<String>) -> Self {
        Self {
            id: id.into(),
            seeds,
            options: CrawlOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CrawlOptions) -> Self {
        self.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, seeds: &str) -> TaskRow {
        let now = Utc::now();
        TaskRow {
            id: "t-1".to_string(),
            seeds: seeds.to_string(),
            ip: Some("10.0.0.1".to_string()),
            user_id_str: Some("user@example.com".to_string()),
            user_agent: Some("pc".to_string()),
            status: status.to_string(),
            is_grab_out_link: true,
            to_single_page: false,
            is_full_site: false,
            is_ref_model: false,
            encoding: Some("".to_string()),
            to_framework: None,
            gmt_modified: now,
            gmt_created: now,
            file_id: Some("f-1".to_string()),
            result: None,
        }
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(TaskStatus::from_code("X"), None);
    }

    #[test]
    fn status_only_moves_forward() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn valid_row_converts() {
        let task = Task::try_from(row("P", r#"["http://example.com", " "]"#)).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.seeds, vec!["http://example.com".to_string()]);
        assert!(task.options.grab_out_site_link);
        assert_eq!(task.options.user_agent_class.as_deref(), Some("pc"));
        assert_eq!(task.options.notify_email.as_deref(), Some("user@example.com"));
        // blank strings are treated as unset
        assert_eq!(task.options.encoding, None);
    }

    #[test]
    fn unknown_status_rejected() {
        let err = Task::try_from(row("Z", r#"["http://example.com"]"#)).unwrap_err();
        assert!(matches!(err, SpiderError::InvalidTask { .. }));
    }

    #[test]
    fn malformed_seeds_rejected() {
        assert!(Task::try_from(row("I", "http://example.com")).is_err());
        assert!(Task::try_from(row("I", "[]")).is_err());
        assert!(Task::try_from(row("I", "[1, 2]")).is_err());
    }
}
