// crates/core/src/task.rs
//! The scheduling data model: scheduled tasks, execution results, and
//! download records.

use crate::cron::CronSchedule;
use crate::validate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Disabled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum stored length of a result's error string.
pub const MAX_ERROR_LEN: usize = 500;

/// Snapshot of one task execution, embedded in the task as `last_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

impl TaskResult {
    pub fn running(task_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Running,
            started_at,
            completed_at: None,
            error: None,
            output: None,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        let mut error: String = error.into();
        error.truncate(error.chars().take(MAX_ERROR_LEN).map(char::len_utf8).sum());
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            started_at,
            completed_at: Some(Utc::now()),
            error: Some(error),
            output: None,
        }
    }
}

/// A cron-scheduled download task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub subreddits: Vec<String>,
    pub enabled: bool,
    pub max_posts_per_subreddit: u32,
    pub retry_count: u32,
    pub retry_delay_seconds: u32,
    pub timeout_seconds: u32,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_result: Option<TaskResult>,
}

impl ScheduledTask {
    /// Build a task with the documented defaults and a fresh UUID, then
    /// validate it.
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        subreddits: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let task = Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            cron_expression: cron_expression.into(),
            subreddits,
            enabled: true,
            max_posts_per_subreddit: 25,
            retry_count: 3,
            retry_delay_seconds: 60,
            timeout_seconds: 3600,
            created_at: Utc::now(),
            last_run: None,
            next_run: None,
            last_result: None,
        };
        task.validate()?;
        Ok(task)
    }

    /// Invariants: non-empty name and subreddit list, positive post cap,
    /// retry delay, and timeout, and a cron expression that parses.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Invalid("task name cannot be empty".into()));
        }
        if self.subreddits.is_empty() {
            return Err(ValidationError::Invalid(
                "task must have at least one subreddit".into(),
            ));
        }
        if self.max_posts_per_subreddit == 0 {
            return Err(ValidationError::Invalid(
                "max_posts_per_subreddit must be positive".into(),
            ));
        }
        if self.retry_delay_seconds == 0 {
            return Err(ValidationError::Invalid(
                "retry_delay_seconds must be positive".into(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(ValidationError::Invalid(
                "timeout_seconds must be positive".into(),
            ));
        }
        if let Err(e) = CronSchedule::parse(&self.cron_expression) {
            return Err(ValidationError::Invalid(format!(
                "invalid cron expression for task '{}': {e}",
                self.name
            )));
        }
        Ok(())
    }
}

/// One successfully rendered download, recorded for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub post_id: String,
    pub post_url: String,
    pub subreddit: String,
    pub title: String,
    pub author: String,
    pub downloaded_at: DateTime<Utc>,
    pub file_path: String,
    /// None for manual downloads outside any scheduled task.
    pub task_id: Option<String>,
}
