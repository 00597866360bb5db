// crates/search/src/query.rs
//! Search query model, FTS query preparation, and the SQL build/execute
//! path with batch tag loading.

use crate::types::row_to_hit;
use crate::{SearchHit, SearchResult, SearchStore};
use regex_lite::Regex;
use snoovault_core::validate;
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;
use tracing::debug;

const MAX_FTS_TERMS: usize = 20;
const MAX_FILTER_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Relevance,
    Date,
    Upvotes,
    Replies,
}

impl SortBy {
    fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::Date => "date",
            SortBy::Upvotes => "upvotes",
            SortBy::Replies => "replies",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// A search request: optional text plus metadata filters and pagination.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub subreddits: Vec<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub min_upvotes: Option<i64>,
    pub max_upvotes: Option<i64>,
    /// Epoch seconds, inclusive.
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            subreddits: Vec::new(),
            authors: Vec::new(),
            tags: Vec::new(),
            min_upvotes: None,
            max_upvotes: None,
            date_from: None,
            date_to: None,
            sort_by: SortBy::Relevance,
            sort_order: SortOrder::Desc,
            limit: 50,
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Canonical cache key covering every field; filter lists are sorted
    /// so logically equal queries collide.
    pub fn cache_key(&self) -> String {
        let mut subreddits = self.subreddits.clone();
        subreddits.sort();
        let mut authors = self.authors.clone();
        authors.sort();
        let mut tags = self.tags.clone();
        tags.sort();

        format!(
            "text:{}|subreddits:{}|authors:{}|tags:{}|min_upvotes:{:?}|max_upvotes:{:?}|date_from:{:?}|date_to:{:?}|sort:{}:{}|limit:{}|offset:{}",
            self.text,
            subreddits.join(","),
            authors.join(","),
            tags.join(","),
            self.min_upvotes,
            self.max_upvotes,
            self.date_from,
            self.date_to,
            self.sort_by.as_str(),
            self.sort_order.as_str(),
            self.limit,
            self.offset,
        )
    }
}

/// Turn free text into a safe FTS5 expression: unbalanced quotes stripped,
/// word characters only, at most 20 terms, terms under 2 chars dropped,
/// `*` appended for prefix matching.
pub fn prepare_fts_query(text: &str) -> String {
    let mut text = text.to_string();
    if text.matches('"').count() % 2 != 0 {
        text = text.replace('"', "");
    }

    let word = Regex::new(r"\w+").unwrap();
    let mut terms = Vec::new();
    for m in word.find_iter(&text).take(MAX_FTS_TERMS) {
        let w = m.as_str();
        if w.chars().count() >= 2 {
            terms.push(format!("{w}*"));
        }
    }
    terms.join(" ")
}

impl SearchStore {
    /// Execute a validated search. Text queries join the FTS shadow with a
    /// snippet and BM25 rank; metadata queries select straight from posts.
    pub async fn search(&self, query: &SearchQuery) -> SearchResult<Vec<SearchHit>> {
        validate::validate_range("limit", Some(query.limit), 1, 1000)?;
        validate::validate_range("offset", Some(query.offset), 0, i64::MAX)?;
        validate::validate_range("min_upvotes", query.min_upvotes, 0, i64::MAX)?;
        validate::validate_range("max_upvotes", query.max_upvotes, 0, i64::MAX)?;
        validate::validate_range("date_from", query.date_from, 0, i64::MAX)?;
        validate::validate_range("date_to", query.date_to, 0, i64::MAX)?;

        let text = validate::sanitize_search_text(&query.text);
        let fts_query = if text.is_empty() {
            String::new()
        } else {
            prepare_fts_query(&text)
        };
        let has_text = !fts_query.is_empty();

        let mut qb = if has_text {
            let mut qb = QueryBuilder::new(
                "SELECT p.*, snippet(posts_fts, 2, '<mark>', '</mark>', '...', 32) AS snippet, \
                 bm25(posts_fts) AS rank_score \
                 FROM posts p \
                 JOIN posts_fts ON p.id = posts_fts.rowid",
            );
            push_tag_joins(&mut qb, &query.tags, "p");
            qb.push(" WHERE posts_fts MATCH ").push_bind(fts_query);
            qb
        } else {
            let mut qb = QueryBuilder::new(
                "SELECT posts.*, '' AS snippet, 0.0 AS rank_score FROM posts",
            );
            push_tag_joins(&mut qb, &query.tags, "posts");
            qb.push(" WHERE 1=1");
            qb
        };

        let prefix = if has_text { "p" } else { "posts" };

        push_in_filter(&mut qb, &format!("{prefix}.subreddit"), &query.subreddits);
        push_in_filter(&mut qb, &format!("{prefix}.author"), &query.authors);

        if let Some(min) = query.min_upvotes {
            qb.push(format!(" AND {prefix}.upvotes >= ")).push_bind(min);
        }
        if let Some(max) = query.max_upvotes {
            qb.push(format!(" AND {prefix}.upvotes <= ")).push_bind(max);
        }
        if let Some(from) = query.date_from {
            qb.push(format!(" AND {prefix}.created_utc >= ")).push_bind(from);
        }
        if let Some(to) = query.date_to {
            qb.push(format!(" AND {prefix}.created_utc <= ")).push_bind(to);
        }

        let normalized_tags = normalize_tags(&query.tags);
        if !normalized_tags.is_empty() {
            qb.push(" AND t.name IN (");
            let mut separated = qb.separated(", ");
            for tag in &normalized_tags {
                separated.push_bind(tag.clone());
            }
            separated.push_unseparated(")");
        }

        if has_text {
            qb.push(" ORDER BY rank_score ASC");
        } else {
            qb.push(format!(" ORDER BY {prefix}.created_utc DESC"));
        }

        qb.push(" LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut hits = rows
            .iter()
            .map(row_to_hit)
            .collect::<SearchResult<Vec<_>>>()?;

        self.attach_tags(&mut hits).await?;

        debug!(results = hits.len(), has_text, "search executed");
        Ok(hits)
    }

    /// Load tags for the whole result page in one query and attach them,
    /// grouped by Reddit post id.
    pub async fn attach_tags(&self, hits: &mut [SearchHit]) -> SearchResult<()> {
        if hits.is_empty() {
            return Ok(());
        }

        let mut qb = QueryBuilder::new(
            "SELECT p.post_id, t.name \
             FROM posts p \
             JOIN post_tags pt ON p.id = pt.post_id \
             JOIN tags t ON pt.tag_id = t.id \
             WHERE p.post_id IN (",
        );
        let mut separated = qb.separated(", ");
        for hit in hits.iter() {
            separated.push_bind(hit.post_id.clone());
        }
        separated.push_unseparated(") ORDER BY p.post_id, t.name");

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut by_post: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let post_id: String = row.try_get("post_id")?;
            let name: String = row.try_get("name")?;
            by_post.entry(post_id).or_default().push(name);
        }

        for hit in hits.iter_mut() {
            hit.tags = by_post.remove(&hit.post_id).unwrap_or_default();
        }
        Ok(())
    }
}

fn push_tag_joins(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, tags: &[String], prefix: &str) {
    if !normalize_tags(tags).is_empty() {
        qb.push(format!(
            " JOIN post_tags pt ON {prefix}.id = pt.post_id JOIN tags t ON pt.tag_id = t.id"
        ));
    }
}

fn push_in_filter(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, column: &str, values: &[String]) {
    let capped: Vec<String> = values
        .iter()
        .filter(|v| !v.is_empty())
        .map(|v| validate::truncate_chars(v, MAX_FILTER_LEN))
        .collect();
    if capped.is_empty() {
        return;
    }

    qb.push(format!(" AND {column} IN ("));
    let mut separated = qb.separated(", ");
    for value in capped {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter_map(|t| validate::normalize_tag_name(t).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_post;
    use crate::NewPost;

    async fn seeded_store() -> SearchStore {
        let store = SearchStore::open_in_memory().await.unwrap();
        let posts = [
            ("/data/a.md", "aaa111", "r/rust", "alice", 100, 1_700_000_000, "A pythonic approach to ownership in rust"),
            ("/data/b.md", "bbb222", "r/rust", "bob", 10, 1_700_100_000, "Borrow checker war stories from production"),
            ("/data/c.md", "ccc333", "r/programming", "alice", 500, 1_700_200_000, "Asyncio pitfalls and how to avoid them"),
        ];
        for (path, id, sub, author, upvotes, created, content) in posts {
            let post = NewPost {
                author: Some(author.into()),
                subreddit: Some(sub.into()),
                upvotes,
                created_utc: Some(created),
                ..sample_post(path, id, content)
            };
            store.upsert_post(&post).await.unwrap();
        }
        store
    }

    #[test]
    fn test_prepare_fts_query_prefixes_terms() {
        assert_eq!(prepare_fts_query("rust async"), "rust* async*");
    }

    #[test]
    fn test_prepare_fts_query_drops_short_terms() {
        assert_eq!(prepare_fts_query("a rust b"), "rust*");
    }

    #[test]
    fn test_prepare_fts_query_strips_unbalanced_quotes() {
        assert_eq!(prepare_fts_query("\"rust async"), "rust* async*");
    }

    #[test]
    fn test_prepare_fts_query_caps_terms() {
        let many = (0..40).map(|i| format!("term{i}")).collect::<Vec<_>>().join(" ");
        let prepared = prepare_fts_query(&many);
        assert_eq!(prepared.split(' ').count(), 20);
    }

    #[test]
    fn test_cache_key_sorts_filter_lists() {
        let a = SearchQuery {
            subreddits: vec!["r/rust".into(), "r/python".into()],
            ..SearchQuery::text("x")
        };
        let b = SearchQuery {
            subreddits: vec!["r/python".into(), "r/rust".into()],
            ..SearchQuery::text("x")
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[tokio::test]
    async fn test_text_search_returns_snippet_and_rank() {
        let store = seeded_store().await;
        let hits = store.search(&SearchQuery::text("borrow checker")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, "bbb222");
        assert!(hits[0].snippet.contains("<mark>"));
        assert!(hits[0].rank_score != 0.0);
    }

    #[tokio::test]
    async fn test_prefix_matching_finds_longer_words() {
        let store = seeded_store().await;
        let hits = store.search(&SearchQuery::text("pyth")).await.unwrap();
        assert_eq!(hits.len(), 1, "pyth* should match 'pythonic'");
        assert_eq!(hits[0].post_id, "aaa111");
    }

    #[tokio::test]
    async fn test_metadata_search_ordered_by_created_desc() {
        let store = seeded_store().await;
        let hits = store.search(&SearchQuery::default()).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].post_id, "ccc333");
        assert!(hits[0].snippet.is_empty());
        assert_eq!(hits[0].rank_score, 0.0);
    }

    #[tokio::test]
    async fn test_subreddit_and_upvote_filters() {
        let store = seeded_store().await;
        let query = SearchQuery {
            subreddits: vec!["r/rust".into()],
            min_upvotes: Some(50),
            ..Default::default()
        };
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, "aaa111");
    }

    #[tokio::test]
    async fn test_date_range_filter() {
        let store = seeded_store().await;
        let query = SearchQuery {
            date_from: Some(1_700_050_000),
            date_to: Some(1_700_150_000),
            ..Default::default()
        };
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, "bbb222");
    }

    #[tokio::test]
    async fn test_tag_filter_joins_junction() {
        let store = seeded_store().await;
        store.create_tag("favorites", "", "").await.unwrap();
        store.tag_post("aaa111", &["favorites".into()]).await.unwrap();

        let query = SearchQuery {
            tags: vec!["favorites".into()],
            ..Default::default()
        };
        let hits = store.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_id, "aaa111");
        assert_eq!(hits[0].tags, vec!["favorites".to_string()]);
    }

    #[tokio::test]
    async fn test_batch_tag_attachment() {
        let store = seeded_store().await;
        store.create_tag("alpha", "", "").await.unwrap();
        store.create_tag("beta", "", "").await.unwrap();
        store.tag_post("aaa111", &["alpha".into(), "beta".into()]).await.unwrap();
        store.tag_post("bbb222", &["alpha".into()]).await.unwrap();

        let hits = store.search(&SearchQuery::default()).await.unwrap();
        let by_id: HashMap<_, _> = hits.iter().map(|h| (h.post_id.clone(), h)).collect();
        assert_eq!(by_id["aaa111"].tags, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(by_id["bbb222"].tags, vec!["alpha".to_string()]);
        assert!(by_id["ccc333"].tags.is_empty());
    }

    #[tokio::test]
    async fn test_limit_validation() {
        let store = seeded_store().await;
        let query = SearchQuery {
            limit: 0,
            ..Default::default()
        };
        assert!(store.search(&query).await.is_err());

        let query = SearchQuery {
            limit: 1001,
            ..Default::default()
        };
        assert!(store.search(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = seeded_store().await;
        let page1 = store
            .search(&SearchQuery {
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        let page2 = store
            .search(&SearchQuery {
                limit: 2,
                offset: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page2.len(), 1);
        assert_ne!(page1[0].post_id, page2[0].post_id);
    }
}
