// crates/search/src/lib.rs
//! Full-text search index over archived Reddit posts.
//!
//! SQLite schema: a `posts` metadata table, an FTS5 shadow table addressed
//! by the posts rowid, user tags, and a post-tag junction with trigger-
//! maintained usage counts. Writes are upserts keyed by file path with
//! SHA-256 change detection; an unchanged hash is a no-op.

mod cache;
mod engine;
mod maintenance;
mod migrations;
mod query;
mod tags;
mod types;

pub use cache::{AnalyticsSnapshot, QueryCache, SearchAnalytics};
pub use engine::{SearchEngine, SearchStream};
pub use maintenance::{RepairSummary, SearchIntegrityReport};
pub use query::{prepare_fts_query, SearchQuery, SortBy, SortOrder};
pub use tags::Tag;
pub use types::{IndexStats, NewPost, PostRow, SearchHit, UpsertOutcome};

use sha2::{Digest, Sha256};
use snoovault_core::validate::{self, ValidationError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const POOL_SIZE: u32 = 5;
const STATS_CACHE_TTL: Duration = Duration::from_secs(60);
const MAX_TITLE_LEN: usize = 500;
const MAX_UPVOTES: i64 = 1_000_000;
const MAX_REPLY_COUNT: i64 = 100_000;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Handle to the search index database.
#[derive(Debug, Clone)]
pub struct SearchStore {
    pool: SqlitePool,
    db_path: PathBuf,
    stats_cache: std::sync::Arc<Mutex<Option<(Instant, IndexStats)>>>,
}

impl SearchStore {
    /// Open (or create) the index at the given path and run migrations.
    pub async fn open(path: &Path) -> SearchResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30))
            .pragma("temp_store", "MEMORY")
            .pragma("cache_size", "10000");

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            db_path: path.to_owned(),
            stats_cache: Default::default(),
        };
        store.run_migrations().await?;

        info!("search index opened at {}", path.display());
        Ok(store)
    }

    /// In-memory index for tests. A single pooled connection keeps every
    /// query on the same private database.
    pub async fn open_in_memory() -> SearchResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            db_path: PathBuf::new(),
            stats_cache: Default::default(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> SearchResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1;
            if version > current_version {
                sqlx::query(migration).execute(&self.pool).await?;
                sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("search index connections closed");
    }

    /// Start an immediate write transaction on the index.
    pub async fn begin_immediate(
        &self,
    ) -> SearchResult<sqlx::Transaction<'static, sqlx::Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Insert or update a post, keyed by file path, in its own immediate
    /// transaction. Returns the posts rowid.
    pub async fn upsert_post(&self, post: &NewPost) -> SearchResult<i64> {
        let mut tx = self.begin_immediate().await?;
        let (rowid, _) = self.upsert_post_tx(&mut tx, post).await?;
        tx.commit().await?;
        Ok(rowid)
    }

    /// Upsert inside a caller-held transaction (the batch-indexing path).
    ///
    /// When the stored content hash matches the incoming content the row
    /// and its shadow are left untouched. Otherwise the row is written and
    /// the FTS shadow row keyed by the posts rowid is replaced.
    pub async fn upsert_post_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
        post: &NewPost,
    ) -> SearchResult<(i64, UpsertOutcome)> {
        if post.title.is_empty() {
            return Err(SearchError::MissingField("title"));
        }
        validate::validate_file_path(&post.file_path)?;
        validate::validate_post_id(&post.post_id)?;
        let upvotes = post.upvotes.clamp(0, MAX_UPVOTES);
        let reply_count = post.reply_count.clamp(0, MAX_REPLY_COUNT);
        let title = validate::truncate_chars(&post.title, MAX_TITLE_LEN);

        let content_hash = hex::encode(Sha256::digest(post.content.as_bytes()));

        let existing = sqlx::query("SELECT id, content_hash FROM posts WHERE file_path = ?")
            .bind(&post.file_path)
            .fetch_optional(&mut **tx)
            .await?;

        let (rowid, outcome) = match existing {
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let stored_hash: Option<String> = row.try_get("content_hash")?;
                if stored_hash.as_deref() == Some(content_hash.as_str()) {
                    debug!(post_id = %post.post_id, "content unchanged, skipping update");
                    return Ok((id, UpsertOutcome::Unchanged));
                }

                sqlx::query(
                    r#"UPDATE posts SET
                           post_id = ?, title = ?, author = ?, subreddit = ?, url = ?,
                           created_utc = ?, upvotes = ?, reply_count = ?,
                           file_modified_time = ?, indexed_time = strftime('%s', 'now'),
                           content_preview = ?, content_hash = ?
                       WHERE file_path = ?"#,
                )
                .bind(&post.post_id)
                .bind(&title)
                .bind(&post.author)
                .bind(&post.subreddit)
                .bind(&post.url)
                .bind(post.created_utc)
                .bind(upvotes)
                .bind(reply_count)
                .bind(post.file_modified_time)
                .bind(&post.content_preview)
                .bind(&content_hash)
                .bind(&post.file_path)
                .execute(&mut **tx)
                .await?;
                (id, UpsertOutcome::Updated)
            }
            None => {
                let result = sqlx::query(
                    r#"INSERT INTO posts
                           (file_path, post_id, title, author, subreddit, url,
                            created_utc, upvotes, reply_count, file_modified_time,
                            content_preview, content_hash)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                )
                .bind(&post.file_path)
                .bind(&post.post_id)
                .bind(&title)
                .bind(&post.author)
                .bind(&post.subreddit)
                .bind(&post.url)
                .bind(post.created_utc)
                .bind(upvotes)
                .bind(reply_count)
                .bind(post.file_modified_time)
                .bind(&post.content_preview)
                .bind(&content_hash)
                .execute(&mut **tx)
                .await?;
                (result.last_insert_rowid(), UpsertOutcome::Inserted)
            }
        };

        // Replace the shadow row for this rowid.
        sqlx::query("DELETE FROM posts_fts WHERE rowid = ?")
            .bind(rowid)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO posts_fts (rowid, post_id, title, content, author, subreddit)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rowid)
        .bind(&post.post_id)
        .bind(&title)
        .bind(&post.content)
        .bind(post.author.as_deref().unwrap_or(""))
        .bind(post.subreddit.as_deref().unwrap_or(""))
        .execute(&mut **tx)
        .await?;

        self.clear_stats_cache();

        debug!(post_id = %post.post_id, rowid, "upserted post");
        Ok((rowid, outcome))
    }

    /// Fetch a post row by its file path.
    pub async fn post_by_file_path(&self, file_path: &str) -> SearchResult<Option<PostRow>> {
        validate::validate_file_path(file_path)?;
        let row = sqlx::query("SELECT * FROM posts WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(types::row_to_post).transpose()
    }

    /// Delete a post (and, via the same transaction, its shadow row).
    /// Junction rows cascade. Returns true when a row was removed.
    pub async fn delete_post_by_path(&self, file_path: &str) -> SearchResult<bool> {
        validate::validate_file_path(file_path)?;

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let existing = sqlx::query("SELECT id FROM posts WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = existing else {
            tx.commit().await?;
            return Ok(false);
        };
        let id: i64 = row.try_get("id")?;

        sqlx::query("DELETE FROM posts_fts WHERE rowid = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.clear_stats_cache();

        debug!(file_path, "deleted post from index");
        Ok(true)
    }

    /// Stored modification times for a batch of paths (change detection).
    pub async fn file_modified_times(
        &self,
        paths: &[String],
    ) -> SearchResult<HashMap<String, f64>> {
        let mut out = HashMap::new();
        for chunk in paths.chunks(1000) {
            let mut qb = sqlx::QueryBuilder::new(
                "SELECT file_path, file_modified_time FROM posts WHERE file_path IN (",
            );
            let mut separated = qb.separated(", ");
            for path in chunk {
                separated.push_bind(path);
            }
            separated.push_unseparated(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in rows {
                let path: String = row.try_get("file_path")?;
                let mtime: Option<f64> = row.try_get("file_modified_time")?;
                out.insert(path, mtime.unwrap_or(0.0));
            }
        }
        Ok(out)
    }

    /// Every indexed file path under a root (the cleanup sweep input).
    pub async fn paths_under_root(&self, root: &str) -> SearchResult<Vec<String>> {
        let rows = sqlx::query("SELECT file_path FROM posts WHERE file_path LIKE ?")
            .bind(format!("{root}%"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Ok(row.try_get::<String, _>("file_path")?))
            .collect()
    }

    /// Aggregate index statistics, cached for one minute.
    pub async fn stats(&self) -> SearchResult<IndexStats> {
        if let Some((at, cached)) = self.stats_cache.lock().unwrap().clone() {
            if at.elapsed() < STATS_CACHE_TTL {
                return Ok(cached);
            }
        }

        let row = sqlx::query(
            r#"SELECT COUNT(*) AS total_posts,
                      COUNT(DISTINCT subreddit) AS total_subreddits,
                      COUNT(DISTINCT author) AS total_authors,
                      COALESCE(SUM(upvotes), 0) AS total_upvotes,
                      COALESCE(AVG(upvotes), 0) AS avg_upvotes
               FROM posts
               WHERE subreddit IS NOT NULL AND author IS NOT NULL"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let tag_row = sqlx::query("SELECT COUNT(*) AS total_tags FROM tags")
            .fetch_one(&self.pool)
            .await?;

        let stats = IndexStats {
            total_posts: row.try_get::<i64, _>("total_posts")? as u64,
            total_subreddits: row.try_get::<i64, _>("total_subreddits")? as u64,
            total_authors: row.try_get::<i64, _>("total_authors")? as u64,
            total_upvotes: row.try_get::<i64, _>("total_upvotes")? as u64,
            avg_upvotes: row.try_get::<f64, _>("avg_upvotes")?,
            total_tags: tag_row.try_get::<i64, _>("total_tags")? as u64,
        };

        *self.stats_cache.lock().unwrap() = Some((Instant::now(), stats.clone()));
        Ok(stats)
    }

    pub(crate) fn clear_stats_cache(&self) {
        *self.stats_cache.lock().unwrap() = None;
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::sample_post;
    use super::*;

    #[tokio::test]
    async fn test_upsert_inserts_and_creates_shadow() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let rowid = store
            .upsert_post(&sample_post("/data/a.md", "aaa111", "hello world content"))
            .await
            .unwrap();

        let fts_count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM posts_fts WHERE rowid = ?")
                .bind(rowid)
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(fts_count.0, 1);
    }

    #[tokio::test]
    async fn test_upsert_unchanged_hash_is_noop() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let post = sample_post("/data/a.md", "aaa111", "same content");

        let first = store.upsert_post(&post).await.unwrap();
        let before = store.post_by_file_path("/data/a.md").await.unwrap().unwrap();

        let second = store.upsert_post(&post).await.unwrap();
        let after = store.post_by_file_path("/data/a.md").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(before.indexed_time, after.indexed_time, "row untouched");
        let fts_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts_fts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(fts_count.0, 1);
    }

    #[tokio::test]
    async fn test_upsert_changed_content_updates_in_place() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let mut post = sample_post("/data/a.md", "aaa111", "first version");
        let first = store.upsert_post(&post).await.unwrap();

        post.content = "second version".into();
        post.upvotes = 99;
        let second = store.upsert_post(&post).await.unwrap();

        assert_eq!(first, second, "same rowid on update");
        let loaded = store.post_by_file_path("/data/a.md").await.unwrap().unwrap();
        assert_eq!(loaded.upvotes, 99);

        let fts_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts_fts")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(fts_count.0, 1, "shadow replaced, not duplicated");
    }

    #[tokio::test]
    async fn test_every_post_has_exactly_one_shadow_row() {
        let store = SearchStore::open_in_memory().await.unwrap();
        for i in 0..5 {
            store
                .upsert_post(&sample_post(
                    &format!("/data/p{i}.md"),
                    &format!("post{i}"),
                    &format!("content number {i}"),
                ))
                .await
                .unwrap();
        }

        let orphans: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM posts_fts WHERE rowid NOT IN (SELECT id FROM posts)",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(orphans.0, 0);

        let missing: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM posts WHERE id NOT IN (SELECT rowid FROM posts_fts)",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(missing.0, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_shadow() {
        let store = SearchStore::open_in_memory().await.unwrap();
        store
            .upsert_post(&sample_post("/data/a.md", "aaa111", "content"))
            .await
            .unwrap();

        assert!(store.delete_post_by_path("/data/a.md").await.unwrap());
        assert!(!store.delete_post_by_path("/data/a.md").await.unwrap());

        let counts: (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM posts), (SELECT COUNT(*) FROM posts_fts)",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(counts, (0, 0));
    }

    #[tokio::test]
    async fn test_upsert_rejects_traversal_path() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let post = sample_post("/data/../etc/a.md", "aaa111", "content");
        assert!(matches!(
            store.upsert_post(&post).await,
            Err(SearchError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_file_modified_times_batch() {
        let store = SearchStore::open_in_memory().await.unwrap();
        store
            .upsert_post(&sample_post("/data/a.md", "aaa111", "x"))
            .await
            .unwrap();
        store
            .upsert_post(&sample_post("/data/b.md", "bbb222", "y"))
            .await
            .unwrap();

        let times = store
            .file_modified_times(&["/data/a.md".into(), "/data/b.md".into(), "/data/c.md".into()])
            .await
            .unwrap();
        assert_eq!(times.len(), 2);
        assert!(times.contains_key("/data/a.md"));
        assert!(!times.contains_key("/data/c.md"));
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = SearchStore::open_in_memory().await.unwrap();
        for i in 0..3 {
            store
                .upsert_post(&sample_post(
                    &format!("/data/p{i}.md"),
                    &format!("post{i}"),
                    "body",
                ))
                .await
                .unwrap();
        }
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_posts, 3);
        assert_eq!(stats.total_subreddits, 1);
        assert_eq!(stats.total_upvotes, 30);
    }
}
