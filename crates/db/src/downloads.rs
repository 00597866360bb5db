// crates/db/src/downloads.rs
//! Download history: dedup lookups, history queries, and batched
//! retention cleanup.

use crate::tasks::{fmt_ts, parse_ts};
use crate::{StateStore, StoreResult};
use chrono::{Duration, Utc};
use snoovault_core::task::DownloadRecord;
use sqlx::{QueryBuilder, Row};
use std::collections::HashSet;
use tracing::{debug, info};

/// Optional filters for [`StateStore::download_history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub task_id: Option<String>,
    pub subreddit: Option<String>,
    pub limit: i64,
}

impl StateStore {
    /// Append a download record.
    pub async fn record_download(&self, record: &DownloadRecord) -> StoreResult<()> {
        let mut tx = self.begin_immediate().await?;
        sqlx::query(
            r#"INSERT INTO download_history
               (post_id, post_url, subreddit, title, author, downloaded_at,
                file_path, task_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.post_id)
        .bind(&record.post_url)
        .bind(&record.subreddit)
        .bind(&record.title)
        .bind(&record.author)
        .bind(fmt_ts(record.downloaded_at))
        .bind(&record.file_path)
        .bind(&record.task_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(post_id = %record.post_id, "recorded download");
        Ok(())
    }

    /// Whether `(post_id, subreddit)` has ever been recorded.
    pub async fn is_post_downloaded(
        &self,
        post_id: &str,
        subreddit: &str,
    ) -> StoreResult<bool> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query(
            "SELECT 1 FROM download_history WHERE post_id = ? AND subreddit = ? LIMIT 1",
        )
        .bind(post_id)
        .bind(subreddit)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    /// Post ids downloaded from `subreddit` within the last `since_days`.
    pub async fn downloaded_post_ids(
        &self,
        subreddit: &str,
        since_days: u32,
    ) -> StoreResult<HashSet<String>> {
        let cutoff = fmt_ts(Utc::now() - Duration::days(since_days as i64));
        let mut conn = self.acquire().await?;
        let rows = sqlx::query(
            "SELECT post_id FROM download_history WHERE subreddit = ? AND downloaded_at >= ?",
        )
        .bind(subreddit)
        .bind(cutoff)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<String, _>("post_id")?))
            .collect()
    }

    /// Recent download records, newest first, optionally filtered.
    pub async fn download_history(
        &self,
        filter: &HistoryFilter,
    ) -> StoreResult<Vec<DownloadRecord>> {
        let mut qb = QueryBuilder::new("SELECT * FROM download_history WHERE 1=1");
        if let Some(task_id) = &filter.task_id {
            qb.push(" AND task_id = ").push_bind(task_id);
        }
        if let Some(subreddit) = &filter.subreddit {
            qb.push(" AND subreddit = ").push_bind(subreddit);
        }
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        qb.push(" ORDER BY downloaded_at DESC LIMIT ").push_bind(limit);

        let mut conn = self.acquire().await?;
        let rows = qb.build().fetch_all(&mut *conn).await?;

        rows.into_iter()
            .map(|row| {
                Ok(DownloadRecord {
                    post_id: row.try_get("post_id")?,
                    post_url: row.try_get("post_url")?,
                    subreddit: row.try_get("subreddit")?,
                    title: row.try_get("title")?,
                    author: row.try_get("author")?,
                    downloaded_at: parse_ts(row.try_get("downloaded_at")?)?,
                    file_path: row.try_get("file_path")?,
                    task_id: row.try_get("task_id")?,
                })
            })
            .collect()
    }

    /// Delete records older than `days_to_keep`. With a batch size, deletes
    /// chunks of that many rowids with a commit boundary between chunks;
    /// returns the total removed.
    pub async fn cleanup_old_history(
        &self,
        days_to_keep: u32,
        batch_size: Option<usize>,
    ) -> StoreResult<u64> {
        let cutoff = fmt_ts(Utc::now() - Duration::days(days_to_keep as i64));

        let deleted = match batch_size {
            None => {
                let mut tx = self.begin_immediate().await?;
                let result = sqlx::query("DELETE FROM download_history WHERE downloaded_at < ?")
                    .bind(&cutoff)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                result.rows_affected()
            }
            Some(batch_size) => {
                let batch_size = batch_size.max(1);
                let mut total = 0u64;
                loop {
                    let mut tx = self.begin_immediate().await?;
                    let rows = sqlx::query(
                        "SELECT rowid FROM download_history WHERE downloaded_at < ? LIMIT ?",
                    )
                    .bind(&cutoff)
                    .bind(batch_size as i64)
                    .fetch_all(&mut *tx)
                    .await?;

                    let rowids: Vec<i64> = rows
                        .into_iter()
                        .map(|row| row.try_get::<i64, _>("rowid"))
                        .collect::<Result<_, _>>()?;

                    if rowids.is_empty() {
                        break;
                    }

                    let mut qb =
                        QueryBuilder::new("DELETE FROM download_history WHERE rowid IN (");
                    let mut separated = qb.separated(", ");
                    for rowid in &rowids {
                        separated.push_bind(rowid);
                    }
                    separated.push_unseparated(")");
                    let result = qb.build().execute(&mut *tx).await?;
                    tx.commit().await?;

                    total += result.rows_affected();
                    if rowids.len() < batch_size {
                        break;
                    }
                }
                total
            }
        };

        if deleted > 0 {
            info!(deleted, "cleaned up old download records");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(post_id: &str, subreddit: &str, downloaded_at: DateTime<Utc>) -> DownloadRecord {
        DownloadRecord {
            post_id: post_id.into(),
            post_url: format!("https://www.reddit.com/r/{subreddit}/comments/{post_id}/t/"),
            subreddit: subreddit.into(),
            title: format!("title {post_id}"),
            author: "author".into(),
            downloaded_at,
            file_path: format!("/data/{subreddit}/{post_id}.md"),
            task_id: None,
        }
    }

    #[tokio::test]
    async fn test_record_and_lookup() {
        let store = StateStore::open_in_memory().await.unwrap();
        store
            .record_download(&record("abc123", "rust", Utc::now()))
            .await
            .unwrap();

        assert!(store.is_post_downloaded("abc123", "rust").await.unwrap());
        assert!(!store.is_post_downloaded("abc123", "cpp").await.unwrap());
        assert!(!store.is_post_downloaded("zzz", "rust").await.unwrap());
    }

    #[tokio::test]
    async fn test_downloaded_post_ids_respects_window() {
        let store = StateStore::open_in_memory().await.unwrap();
        store
            .record_download(&record("fresh1", "rust", Utc::now()))
            .await
            .unwrap();
        store
            .record_download(&record("stale1", "rust", Utc::now() - Duration::days(45)))
            .await
            .unwrap();
        store
            .record_download(&record("other1", "cpp", Utc::now()))
            .await
            .unwrap();

        let ids = store.downloaded_post_ids("rust", 30).await.unwrap();
        assert!(ids.contains("fresh1"));
        assert!(!ids.contains("stale1"), "outside the 30-day window");
        assert!(!ids.contains("other1"), "different subreddit");
    }

    #[tokio::test]
    async fn test_history_filters_and_ordering() {
        let store = StateStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            let mut r = record(&format!("p{i}"), "rust", Utc::now() - Duration::hours(i));
            r.task_id = Some("task-a".into());
            store.record_download(&r).await.unwrap();
        }
        store
            .record_download(&record("q0", "cpp", Utc::now()))
            .await
            .unwrap();

        let rust_only = store
            .download_history(&HistoryFilter {
                subreddit: Some("rust".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(rust_only.len(), 5);
        assert_eq!(rust_only[0].post_id, "p0", "newest first");

        let by_task = store
            .download_history(&HistoryFilter {
                task_id: Some("task-a".into()),
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_task.len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_unbatched() {
        let store = StateStore::open_in_memory().await.unwrap();
        for i in 0..8 {
            store
                .record_download(&record(
                    &format!("old{i}"),
                    "rust",
                    Utc::now() - Duration::days(100),
                ))
                .await
                .unwrap();
        }
        store
            .record_download(&record("new0", "rust", Utc::now()))
            .await
            .unwrap();

        let deleted = store.cleanup_old_history(30, None).await.unwrap();
        assert_eq!(deleted, 8);
        assert!(store.is_post_downloaded("new0", "rust").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_batched_removes_everything_old() {
        let store = StateStore::open_in_memory().await.unwrap();
        for i in 0..100 {
            store
                .record_download(&record(
                    &format!("old{i}"),
                    "rust",
                    Utc::now() - Duration::days(100),
                ))
                .await
                .unwrap();
        }

        let deleted = store.cleanup_old_history(30, Some(10)).await.unwrap();
        assert_eq!(deleted, 100);

        let remaining = store.downloaded_post_ids("rust", 365).await.unwrap();
        assert!(remaining.is_empty(), "no row older than the cutoff remains");
    }

    #[tokio::test]
    async fn test_cleanup_batched_exact_multiple_terminates() {
        let store = StateStore::open_in_memory().await.unwrap();
        for i in 0..10 {
            store
                .record_download(&record(
                    &format!("old{i}"),
                    "rust",
                    Utc::now() - Duration::days(100),
                ))
                .await
                .unwrap();
        }

        let deleted = store.cleanup_old_history(30, Some(5)).await.unwrap();
        assert_eq!(deleted, 10);
    }
}
