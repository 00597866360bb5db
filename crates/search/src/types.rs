// crates/search/src/types.rs
//! Row and result types for the search index.

use crate::SearchResult;
use serde::Serialize;
use sqlx::Row;

/// What an upsert did to the posts row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Stored content hash matched; row and shadow untouched.
    Unchanged,
}

/// Input to [`crate::SearchStore::upsert_post`].
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub file_path: String,
    pub post_id: String,
    pub title: String,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub url: Option<String>,
    pub created_utc: Option<i64>,
    pub upvotes: i64,
    pub reply_count: i64,
    /// Seconds since epoch, fractional.
    pub file_modified_time: f64,
    /// Full text fed to the FTS shadow.
    pub content: String,
    pub content_preview: String,
}

/// A stored posts-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub id: i64,
    pub file_path: String,
    pub post_id: String,
    pub title: String,
    pub author: Option<String>,
    pub subreddit: Option<String>,
    pub url: Option<String>,
    pub created_utc: Option<i64>,
    pub upvotes: i64,
    pub reply_count: i64,
    pub file_modified_time: Option<f64>,
    pub indexed_time: Option<f64>,
    pub content_preview: Option<String>,
    pub content_hash: Option<String>,
}

pub(crate) fn row_to_post(row: sqlx::sqlite::SqliteRow) -> SearchResult<PostRow> {
    Ok(PostRow {
        id: row.try_get("id")?,
        file_path: row.try_get("file_path")?,
        post_id: row.try_get("post_id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        subreddit: row.try_get("subreddit")?,
        url: row.try_get("url")?,
        created_utc: row.try_get("created_utc")?,
        upvotes: row.try_get("upvotes")?,
        reply_count: row.try_get("reply_count")?,
        file_modified_time: row.try_get("file_modified_time")?,
        indexed_time: row.try_get("indexed_time")?,
        content_preview: row.try_get("content_preview")?,
        content_hash: row.try_get("content_hash")?,
    })
}

/// One search result, with its snippet, rank, and attached tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub post_id: String,
    pub title: String,
    pub author: String,
    pub subreddit: String,
    pub url: String,
    pub file_path: String,
    pub created_utc: i64,
    pub upvotes: i64,
    pub reply_count: i64,
    pub content_preview: String,
    /// Highlighted 32-word window when the query had text, else empty.
    pub snippet: String,
    /// BM25 score when the query had text (lower is better), else zero.
    pub rank_score: f64,
    pub tags: Vec<String>,
}

pub(crate) fn row_to_hit(row: &sqlx::sqlite::SqliteRow) -> SearchResult<SearchHit> {
    Ok(SearchHit {
        post_id: row.try_get("post_id")?,
        title: row.try_get("title")?,
        author: row.try_get::<Option<String>, _>("author")?.unwrap_or_default(),
        subreddit: row
            .try_get::<Option<String>, _>("subreddit")?
            .unwrap_or_default(),
        url: row.try_get::<Option<String>, _>("url")?.unwrap_or_default(),
        file_path: row.try_get("file_path")?,
        created_utc: row
            .try_get::<Option<i64>, _>("created_utc")?
            .unwrap_or_default(),
        upvotes: row.try_get("upvotes")?,
        reply_count: row.try_get("reply_count")?,
        content_preview: row
            .try_get::<Option<String>, _>("content_preview")?
            .unwrap_or_default(),
        snippet: row.try_get("snippet")?,
        rank_score: row.try_get("rank_score")?,
        tags: Vec::new(),
    })
}

/// Aggregate counters over the index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_posts: u64,
    pub total_subreddits: u64,
    pub total_authors: u64,
    pub total_upvotes: u64,
    pub avg_upvotes: f64,
    pub total_tags: u64,
}
