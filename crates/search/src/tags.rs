// crates/search/src/tags.rs
//! User tags: CRUD, post tagging, and pattern-based auto-tagging.

use crate::{SearchError, SearchResult, SearchStore};
use regex_lite::Regex;
use snoovault_core::validate::{is_valid_color, normalize_tag_name};
use sqlx::Row;
use tracing::{debug, info, warn};

/// A tag row. `usage_count` is maintained by the junction-table triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub color: String,
    pub created_time: f64,
    pub usage_count: i64,
}

/// Pattern table for auto-tagging, matched against title + preview.
const AUTO_TAG_PATTERNS: &[(&str, &[&str])] = &[
    (
        "question",
        &[r"\?$", r"^(how|what|why|when|where|who)\s", r"\b(question|help|ask)\b"],
    ),
    (
        "discussion",
        &[r"\b(discuss|discussion|thoughts|opinions|what do you think)\b"],
    ),
    ("news", &[r"\b(breaking|news|announced|report)\b"]),
    ("tutorial", &[r"\b(tutorial|guide|how-to|step by step)\b"]),
    ("review", &[r"\b(review|rating|opinion on)\b"]),
    ("meme", &[r"\b(meme|funny|humor|lol)\b"]),
];

impl SearchStore {
    /// Create a tag (normalized name). An existing tag of the same name is
    /// returned as-is; an invalid color is dropped with a warning.
    pub async fn create_tag(
        &self,
        name: &str,
        description: &str,
        color: &str,
    ) -> SearchResult<Tag> {
        let normalized = normalize_tag_name(name)?;

        if let Some(existing) = self.get_tag(&normalized).await? {
            warn!(tag = %normalized, "tag already exists");
            return Ok(existing);
        }

        let color = if color.is_empty() || is_valid_color(color) {
            color
        } else {
            warn!(color, "invalid color format, ignoring");
            ""
        };

        sqlx::query("INSERT INTO tags (name, description, color) VALUES (?, ?, ?)")
            .bind(&normalized)
            .bind(description)
            .bind(color)
            .execute(&self.pool)
            .await?;

        info!(tag = %normalized, "created tag");
        self.get_tag(&normalized)
            .await?
            .ok_or_else(|| SearchError::MissingField("tag"))
    }

    /// Look up a tag by (normalized) name.
    pub async fn get_tag(&self, name: &str) -> SearchResult<Option<Tag>> {
        let normalized = normalize_tag_name(name)?;
        let row = sqlx::query("SELECT * FROM tags WHERE name = ?")
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_tag).transpose()
    }

    /// All tags, most used first.
    pub async fn list_tags(&self, limit: i64) -> SearchResult<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags ORDER BY usage_count DESC, name ASC LIMIT ?")
            .bind(if limit > 0 { limit } else { 100 })
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_tag).collect()
    }

    /// Delete a tag; junction rows cascade. True when a row was removed.
    pub async fn delete_tag(&self, name: &str) -> SearchResult<bool> {
        let normalized = normalize_tag_name(name)?;
        let result = sqlx::query("DELETE FROM tags WHERE name = ?")
            .bind(&normalized)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(tag = %normalized, "deleted tag");
        }
        Ok(deleted)
    }

    /// Apply tags to a post (by Reddit post id), creating missing tags.
    /// Returns how many junction rows were actually added.
    pub async fn tag_post(&self, post_id: &str, tag_names: &[String]) -> SearchResult<u64> {
        if tag_names.is_empty() {
            return Ok(0);
        }

        let Some(db_post_id) = self.post_rowid(post_id).await? else {
            warn!(post_id, "post not found for tagging");
            return Ok(0);
        };

        let mut applied = 0;
        for name in tag_names {
            let tag = match self.get_tag(name).await? {
                Some(tag) => tag,
                None => self.create_tag(name, "", "").await?,
            };

            let result =
                sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag_id) VALUES (?, ?)")
                    .bind(db_post_id)
                    .bind(tag.id)
                    .execute(&self.pool)
                    .await?;
            applied += result.rows_affected();
        }

        debug!(post_id, applied, "tagged post");
        Ok(applied)
    }

    /// Remove specific tags from a post, or all of them when `tag_names`
    /// is None. Returns how many junction rows were removed.
    pub async fn untag_post(
        &self,
        post_id: &str,
        tag_names: Option<&[String]>,
    ) -> SearchResult<u64> {
        let Some(db_post_id) = self.post_rowid(post_id).await? else {
            warn!(post_id, "post not found for untagging");
            return Ok(0);
        };

        let removed = match tag_names {
            None => {
                sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
                    .bind(db_post_id)
                    .execute(&self.pool)
                    .await?
                    .rows_affected()
            }
            Some(names) => {
                let mut removed = 0;
                for name in names {
                    let normalized = normalize_tag_name(name)?;
                    let result = sqlx::query(
                        "DELETE FROM post_tags
                         WHERE post_id = ? AND tag_id = (SELECT id FROM tags WHERE name = ?)",
                    )
                    .bind(db_post_id)
                    .bind(&normalized)
                    .execute(&self.pool)
                    .await?;
                    removed += result.rows_affected();
                }
                removed
            }
        };

        debug!(post_id, removed, "untagged post");
        Ok(removed)
    }

    /// Tags attached to a post, alphabetically.
    pub async fn post_tags(&self, post_id: &str) -> SearchResult<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT t.* FROM tags t
             JOIN post_tags pt ON t.id = pt.tag_id
             JOIN posts p ON pt.post_id = p.id
             WHERE p.post_id = ?
             ORDER BY t.name",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_tag).collect()
    }

    /// Pattern-based auto-tagging over the post's title and preview, plus
    /// a `sub_<subreddit>` tag. Returns the tag names applied.
    pub async fn auto_tag_post(&self, post_id: &str) -> SearchResult<Vec<String>> {
        let row = sqlx::query(
            "SELECT title, content_preview, subreddit FROM posts WHERE post_id = ?",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            warn!(post_id, "post not found for auto-tagging");
            return Ok(Vec::new());
        };

        let title: String = row.try_get("title")?;
        let preview: Option<String> = row.try_get("content_preview")?;
        let subreddit: Option<String> = row.try_get("subreddit")?;
        let text = format!("{} {}", title, preview.unwrap_or_default()).to_lowercase();

        let mut suggested = Vec::new();
        for (tag_name, patterns) in AUTO_TAG_PATTERNS {
            for pattern in *patterns {
                if Regex::new(pattern).unwrap().is_match(&text) {
                    suggested.push(tag_name.to_string());
                    break;
                }
            }
        }

        if let Some(subreddit) = subreddit.filter(|s| !s.is_empty()) {
            let stripped = subreddit.to_lowercase().replace("r/", "");
            suggested.push(format!("sub_{stripped}"));
        }

        suggested.sort();
        suggested.dedup();

        let mut applied = Vec::new();
        for name in suggested {
            if self.get_tag(&name).await?.is_none() {
                self.create_tag(&name, &format!("Auto-generated tag: {name}"), "")
                    .await?;
            }
            if self.tag_post(post_id, std::slice::from_ref(&name)).await? > 0 {
                applied.push(name);
            }
        }

        if !applied.is_empty() {
            info!(post_id, ?applied, "auto-applied tags");
        }
        Ok(applied)
    }

    /// Apply the same tags to many posts. Returns (succeeded, failed).
    pub async fn bulk_tag_posts(
        &self,
        post_ids: &[String],
        tag_names: &[String],
    ) -> SearchResult<(u64, u64)> {
        let mut succeeded = 0;
        let mut failed = 0;
        for post_id in post_ids {
            if self.tag_post(post_id, tag_names).await? > 0 {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }
        info!(succeeded, failed, "bulk tagged posts");
        Ok((succeeded, failed))
    }

    async fn post_rowid(&self, post_id: &str) -> SearchResult<Option<i64>> {
        let row = sqlx::query("SELECT id FROM posts WHERE post_id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(r.try_get("id")?)).transpose()
    }
}

fn row_to_tag(row: sqlx::sqlite::SqliteRow) -> SearchResult<Tag> {
    Ok(Tag {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        color: row.try_get::<Option<String>, _>("color")?.unwrap_or_default(),
        created_time: row
            .try_get::<Option<f64>, _>("created_time")?
            .unwrap_or_default(),
        usage_count: row.try_get("usage_count")?,
    })
}
