// crates/db/src/maintenance.rs
//! Integrity checking and store statistics.

use crate::tasks::fmt_ts;
use crate::{StateStore, StoreResult};
use chrono::{Duration, Utc};
use sqlx::Row;
use tracing::info;

/// Outcome of an integrity pass. Reported violations never raise.
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub ok: bool,
    /// Raw result of `PRAGMA integrity_check` when not "ok".
    pub integrity_errors: Vec<String>,
    pub foreign_key_violations: u64,
}

/// Aggregate counters over tasks and download history.
#[derive(Debug, Clone, Default)]
pub struct StoreStatistics {
    pub total_tasks: u64,
    pub enabled_tasks: u64,
    pub oldest_task: Option<String>,
    pub last_execution: Option<String>,
    pub total_downloads: u64,
    pub unique_subreddits: u64,
    pub unique_posts: u64,
    pub first_download: Option<String>,
    pub last_download: Option<String>,
    pub recent_7_days: u64,
    pub db_path: String,
    pub db_size_bytes: u64,
}

impl StateStore {
    /// Run the engine's integrity pragma and foreign-key check.
    pub async fn integrity_check(&self) -> StoreResult<IntegrityReport> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query("PRAGMA integrity_check")
            .fetch_all(&mut *conn)
            .await?;
        let mut integrity_errors = Vec::new();
        for row in rows {
            let message: String = row.try_get(0)?;
            if message != "ok" {
                integrity_errors.push(message);
            }
        }

        let fk_rows = sqlx::query("PRAGMA foreign_key_check")
            .fetch_all(&mut *conn)
            .await?;
        let foreign_key_violations = fk_rows.len() as u64;

        let report = IntegrityReport {
            ok: integrity_errors.is_empty() && foreign_key_violations == 0,
            integrity_errors,
            foreign_key_violations,
        };
        info!(
            ok = report.ok,
            fk_violations = report.foreign_key_violations,
            "state store integrity check completed"
        );
        Ok(report)
    }

    /// Counters snapshot across both tables.
    pub async fn statistics(&self) -> StoreResult<StoreStatistics> {
        let mut conn = self.acquire().await?;

        let task_row = sqlx::query(
            r#"SELECT COUNT(*) AS total,
                      COALESCE(SUM(CASE WHEN enabled = 1 THEN 1 ELSE 0 END), 0) AS enabled,
                      MIN(created_at) AS oldest_task,
                      MAX(last_run) AS last_execution
               FROM scheduled_tasks"#,
        )
        .fetch_one(&mut *conn)
        .await?;

        let download_row = sqlx::query(
            r#"SELECT COUNT(*) AS total,
                      COUNT(DISTINCT subreddit) AS unique_subreddits,
                      COUNT(DISTINCT post_id) AS unique_posts,
                      MIN(downloaded_at) AS first_download,
                      MAX(downloaded_at) AS last_download
               FROM download_history"#,
        )
        .fetch_one(&mut *conn)
        .await?;

        let recent_cutoff = fmt_ts(Utc::now() - Duration::days(7));
        let recent_row =
            sqlx::query("SELECT COUNT(*) AS recent FROM download_history WHERE downloaded_at >= ?")
                .bind(recent_cutoff)
                .fetch_one(&mut *conn)
                .await?;

        let db_size_bytes = std::fs::metadata(self.db_path())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStatistics {
            total_tasks: task_row.try_get::<i64, _>("total")? as u64,
            enabled_tasks: task_row.try_get::<i64, _>("enabled")? as u64,
            oldest_task: task_row.try_get("oldest_task")?,
            last_execution: task_row.try_get("last_execution")?,
            total_downloads: download_row.try_get::<i64, _>("total")? as u64,
            unique_subreddits: download_row.try_get::<i64, _>("unique_subreddits")? as u64,
            unique_posts: download_row.try_get::<i64, _>("unique_posts")? as u64,
            first_download: download_row.try_get("first_download")?,
            last_download: download_row.try_get("last_download")?,
            recent_7_days: recent_row.try_get::<i64, _>("recent")? as u64,
            db_path: self.db_path().display().to_string(),
            db_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snoovault_core::task::{DownloadRecord, ScheduledTask};

    #[tokio::test]
    async fn test_integrity_check_on_fresh_store() {
        let store = StateStore::open_in_memory().await.unwrap();
        let report = store.integrity_check().await.unwrap();
        assert!(report.ok);
        assert!(report.integrity_errors.is_empty());
        assert_eq!(report.foreign_key_violations, 0);
    }

    #[tokio::test]
    async fn test_statistics_counts() {
        let store = StateStore::open_in_memory().await.unwrap();

        let mut enabled = ScheduledTask::new("a", "@daily", vec!["rust".into()]).unwrap();
        enabled.last_run = Some(Utc::now());
        store.save_task(&enabled).await.unwrap();
        let mut disabled = ScheduledTask::new("b", "@daily", vec!["cpp".into()]).unwrap();
        disabled.enabled = false;
        store.save_task(&disabled).await.unwrap();

        for (i, days_ago) in [1i64, 2, 20].iter().enumerate() {
            store
                .record_download(&DownloadRecord {
                    post_id: format!("p{i}"),
                    post_url: "https://redd.it/p".into(),
                    subreddit: if i == 0 { "rust" } else { "cpp" }.into(),
                    title: "t".into(),
                    author: "a".into(),
                    downloaded_at: Utc::now() - Duration::days(*days_ago),
                    file_path: "/data/p.md".into(),
                    task_id: None,
                })
                .await
                .unwrap();
        }

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.enabled_tasks, 1);
        assert!(stats.last_execution.is_some());
        assert_eq!(stats.total_downloads, 3);
        assert_eq!(stats.unique_subreddits, 2);
        assert_eq!(stats.unique_posts, 3);
        assert_eq!(stats.recent_7_days, 2);
    }
}
