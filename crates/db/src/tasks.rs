// crates/db/src/tasks.rs
//! Scheduled-task CRUD. The task-result snapshot is stored as JSON with
//! the status as its string value and RFC 3339 timestamps.

use crate::{StateStore, StoreError, StoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use snoovault_core::task::{ScheduledTask, TaskResult};
use sqlx::Row;
use tracing::{debug, info};

// Fixed-width nanosecond precision: lexicographic comparison in SQL
// matches chronological order, and loads recover the exact instant.
pub(crate) fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::MalformedRow(format!("bad timestamp '{raw}': {e}")))
}

impl StateStore {
    /// Insert or replace a task by id.
    pub async fn save_task(&self, task: &ScheduledTask) -> StoreResult<()> {
        let subreddits = serde_json::to_string(&task.subreddits)
            .map_err(|e| StoreError::MalformedRow(e.to_string()))?;
        let last_result = match &task.last_result {
            Some(result) => Some(
                serde_json::to_string(result)
                    .map_err(|e| StoreError::MalformedRow(e.to_string()))?,
            ),
            None => None,
        };

        let mut tx = self.begin_immediate().await?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO scheduled_tasks
               (id, name, cron_expression, subreddits, enabled,
                max_posts_per_subreddit, retry_count, retry_delay_seconds,
                timeout_seconds, created_at, last_run, next_run, last_result,
                updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(&task.cron_expression)
        .bind(subreddits)
        .bind(task.enabled as i64)
        .bind(task.max_posts_per_subreddit as i64)
        .bind(task.retry_count as i64)
        .bind(task.retry_delay_seconds as i64)
        .bind(task.timeout_seconds as i64)
        .bind(fmt_ts(task.created_at))
        .bind(task.last_run.map(fmt_ts))
        .bind(task.next_run.map(fmt_ts))
        .bind(last_result)
        .bind(fmt_ts(Utc::now()))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(task = %task.name, "saved task");
        Ok(())
    }

    /// Load a task by id; None when absent.
    pub async fn load_task(&self, task_id: &str) -> StoreResult<Option<ScheduledTask>> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query("SELECT * FROM scheduled_tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(row_to_task).transpose()
    }

    /// All tasks, oldest first.
    pub async fn load_all_tasks(&self) -> StoreResult<Vec<ScheduledTask>> {
        let mut conn = self.acquire().await?;
        let rows = sqlx::query("SELECT * FROM scheduled_tasks ORDER BY created_at")
            .fetch_all(&mut *conn)
            .await?;
        rows.into_iter().map(row_to_task).collect()
    }

    /// Delete a task; true when a row was removed.
    pub async fn delete_task(&self, task_id: &str) -> StoreResult<bool> {
        let mut tx = self.begin_immediate().await?;
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(task_id, "deleted task");
        }
        Ok(deleted)
    }
}

fn row_to_task(row: sqlx::sqlite::SqliteRow) -> StoreResult<ScheduledTask> {
    let subreddits: Vec<String> = serde_json::from_str(row.try_get("subreddits")?)
        .map_err(|e| StoreError::MalformedRow(format!("bad subreddits column: {e}")))?;

    let last_result: Option<TaskResult> = match row.try_get::<Option<&str>, _>("last_result")? {
        Some(json) => Some(
            serde_json::from_str(json)
                .map_err(|e| StoreError::MalformedRow(format!("bad last_result column: {e}")))?,
        ),
        None => None,
    };

    Ok(ScheduledTask {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cron_expression: row.try_get("cron_expression")?,
        subreddits,
        enabled: row.try_get::<i64, _>("enabled")? != 0,
        max_posts_per_subreddit: row.try_get::<i64, _>("max_posts_per_subreddit")? as u32,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        retry_delay_seconds: row.try_get::<i64, _>("retry_delay_seconds")? as u32,
        timeout_seconds: row.try_get::<i64, _>("timeout_seconds")? as u32,
        created_at: parse_ts(row.try_get("created_at")?)?,
        last_run: row
            .try_get::<Option<&str>, _>("last_run")?
            .map(parse_ts)
            .transpose()?,
        next_run: row
            .try_get::<Option<&str>, _>("next_run")?
            .map(parse_ts)
            .transpose()?,
        last_result,
    })
}
