// crates/search/src/engine.rs
//! The interactive search engine: cached queries, streaming pagination,
//! and prefix suggestions over the search store.

use crate::{
    AnalyticsSnapshot, QueryCache, SearchAnalytics, SearchHit, SearchQuery, SearchResult,
    SearchStore,
};
use snoovault_core::validate;
use sqlx::Row;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::debug;

/// Search front end combining the store with an LRU query cache and
/// analytics. Cached pages are stored without tags; tags are re-attached
/// on every read so tag edits show up immediately.
pub struct SearchEngine {
    store: SearchStore,
    cache: Option<QueryCache>,
    analytics: SearchAnalytics,
}

impl SearchEngine {
    pub fn new(store: SearchStore) -> Self {
        Self {
            store,
            cache: Some(QueryCache::default()),
            analytics: SearchAnalytics::default(),
        }
    }

    pub fn with_cache(store: SearchStore, cache: Option<QueryCache>) -> Self {
        Self {
            store,
            cache,
            analytics: SearchAnalytics::default(),
        }
    }

    pub fn store(&self) -> &SearchStore {
        &self.store
    }

    /// Cached search. On a hit the stored page is returned with tags
    /// freshly attached; on a miss the store is queried and the page
    /// cached (tags stripped).
    pub async fn search(&self, query: &SearchQuery) -> SearchResult<Vec<SearchHit>> {
        let started = Instant::now();

        if let Some(cache) = &self.cache {
            if let Some(mut hits) = cache.get(query) {
                self.store.attach_tags(&mut hits).await?;
                self.analytics.record_search(started.elapsed(), true);
                debug!(results = hits.len(), "search cache hit");
                return Ok(hits);
            }
        }

        let hits = self.store.search(query).await?;

        if let Some(cache) = &self.cache {
            let mut to_cache = hits.clone();
            for hit in &mut to_cache {
                hit.tags.clear();
            }
            cache.put(query, to_cache);
        }

        self.analytics.record_search(started.elapsed(), false);
        Ok(hits)
    }

    /// Convenience wrapper for a plain text search.
    pub async fn search_simple(
        &self,
        text: &str,
        limit: i64,
    ) -> SearchResult<Vec<SearchHit>> {
        self.search(&SearchQuery {
            limit,
            ..SearchQuery::text(text)
        })
        .await
    }

    /// Lazily paged search. The stream holds the running offset and
    /// derives each page's query on demand; it is consumed once.
    pub fn search_streaming(&self, query: SearchQuery, batch_size: i64) -> SearchStream<'_> {
        SearchStream {
            engine: self,
            original_limit: query.limit,
            base_offset: query.offset,
            query,
            batch_size: batch_size.max(1),
            yielded: 0,
            done: false,
        }
    }

    /// Prefix suggestions: words from matching titles (upvote-ranked),
    /// topped up with matching subreddit names.
    pub async fn suggestions(&self, partial: &str, limit: usize) -> SearchResult<Vec<String>> {
        if partial.chars().count() < 2 {
            return Ok(Vec::new());
        }
        let clean = validate::sanitize_search_text(partial).to_lowercase();
        if clean.is_empty() {
            return Ok(Vec::new());
        }

        let mut suggestions = BTreeSet::new();

        let title_rows = sqlx::query(
            "SELECT title FROM posts WHERE title LIKE ? ORDER BY upvotes DESC LIMIT ?",
        )
        .bind(format!("%{clean}%"))
        .bind((limit * 2) as i64)
        .fetch_all(self.store.pool())
        .await?;

        'outer: for row in title_rows {
            let title: String = row.try_get("title")?;
            for word in title.to_lowercase().split_whitespace() {
                let word: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                if word.chars().count() >= 3 && word.contains(&clean) {
                    suggestions.insert(word);
                    if suggestions.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }

        if suggestions.len() < limit {
            let sub_rows = sqlx::query(
                "SELECT subreddit, COUNT(*) AS post_count FROM posts
                 WHERE subreddit LIKE ?
                 GROUP BY subreddit
                 ORDER BY post_count DESC
                 LIMIT ?",
            )
            .bind(format!("%{clean}%"))
            .bind((limit - suggestions.len()) as i64)
            .fetch_all(self.store.pool())
            .await?;

            for row in sub_rows {
                if let Some(subreddit) = row.try_get::<Option<String>, _>("subreddit")? {
                    suggestions.insert(subreddit);
                }
            }
        }

        Ok(suggestions.into_iter().take(limit).collect())
    }

    pub fn analytics(&self) -> AnalyticsSnapshot {
        self.analytics.snapshot()
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}

/// One-shot page iterator over a search. Each call to [`next_page`]
/// advances the offset by the running count and shrinks the limit by what
/// remains; it ends on an empty page, a short page, or the original limit.
///
/// [`next_page`]: SearchStream::next_page
pub struct SearchStream<'a> {
    engine: &'a SearchEngine,
    query: SearchQuery,
    batch_size: i64,
    original_limit: i64,
    base_offset: i64,
    yielded: i64,
    done: bool,
}

impl SearchStream<'_> {
    pub async fn next_page(&mut self) -> SearchResult<Option<Vec<SearchHit>>> {
        if self.done {
            return Ok(None);
        }

        let remaining = if self.original_limit > 0 {
            self.original_limit - self.yielded
        } else {
            self.batch_size
        };
        if remaining <= 0 {
            self.done = true;
            return Ok(None);
        }

        let batch_query = SearchQuery {
            limit: self.batch_size.min(remaining),
            offset: self.base_offset + self.yielded,
            ..self.query.clone()
        };

        let hits = self.engine.search(&batch_query).await?;
        if hits.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.yielded += hits.len() as i64;
        if (hits.len() as i64) < batch_query.limit {
            self.done = true;
        }
        if self.original_limit > 0 && self.yielded >= self.original_limit {
            self.done = true;
        }

        Ok(Some(hits))
    }

    /// Drain the stream into one vector.
    pub async fn collect_all(mut self) -> SearchResult<Vec<SearchHit>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
