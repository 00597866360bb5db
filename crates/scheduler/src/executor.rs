// crates/scheduler/src/executor.rs
//! Task executor: runs one scheduled task end to end — URL resolution,
//! deduplication against download history, fetch, render, atomic write,
//! and history recording — aggregating per-subreddit outcomes into a
//! single task result.

use crate::fetch::{CachedFetcher, PostFetcher, PostRenderer};
use async_trait::async_trait;
use chrono::Utc;
use snoovault_core::config::{ExecutorConfig, FileFormat};
use snoovault_core::task::{DownloadRecord, ScheduledTask, TaskResult, TaskStatus};
use snoovault_core::{urls, RateLimiter, ResponseCache, RetryPolicy};
use snoovault_db::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// How many per-URL error strings survive into the aggregate error.
const MAX_REPORTED_ERRORS: usize = 3;

/// Executes scheduled tasks. Cheap to clone; every execution shares the
/// same store, fetch wrapper, and renderer.
#[derive(Clone)]
pub struct TaskExecutor {
    store: Arc<StateStore>,
    fetcher: Arc<CachedFetcher>,
    renderer: Arc<dyn PostRenderer>,
    config: ExecutorConfig,
    save_dir: PathBuf,
    retry_policy: RetryPolicy,
}

/// Counters for one subreddit's pass.
#[derive(Debug, Default)]
struct SubredditOutcome {
    downloaded: u64,
    skipped: u64,
    errors: Vec<String>,
}

impl SubredditOutcome {
    fn absorb(&mut self, other: SubredditOutcome) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }
}

impl TaskExecutor {
    pub fn new(
        store: Arc<StateStore>,
        fetcher: Arc<dyn PostFetcher>,
        renderer: Arc<dyn PostRenderer>,
        config: ExecutorConfig,
        save_dir: PathBuf,
        cache: ResponseCache<serde_json::Value>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            store,
            fetcher: Arc::new(CachedFetcher::new(fetcher, cache, limiter)),
            renderer,
            config,
            save_dir,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// The backoff policy callers may wrap around transient failures.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Execute one task. Never errors: every failure mode is folded into
    /// a `failed` result.
    ///
    /// The download pipeline runs as a detached worker; a watchdog awaits
    /// it with the task's wall-clock deadline and reports `failed` when it
    /// elapses, leaving the worker to finish on its own.
    pub async fn execute_task(&self, task: &ScheduledTask) -> TaskResult {
        let started = Utc::now();
        info!(task = %task.name, id = %task.id, "starting task execution");

        if let Some(reason) = validate_task(task) {
            return TaskResult::failed(&task.id, started, reason);
        }

        let this = self.clone();
        let owned_task = task.clone();
        let body = tokio::spawn(async move { this.run_task_body(owned_task, started).await });

        let deadline = Duration::from_secs(task.timeout_seconds as u64);
        match tokio::time::timeout(deadline, body).await {
            Ok(Ok(result)) => {
                if result.status == TaskStatus::Completed {
                    info!(task = %task.name, "task completed");
                } else {
                    warn!(task = %task.name, error = ?result.error, "task failed");
                }
                result
            }
            Ok(Err(join_error)) => {
                error!(task = %task.name, "task body panicked: {join_error}");
                TaskResult::failed(&task.id, started, format!("task panicked: {join_error}"))
            }
            Err(_) => {
                error!(
                    task = %task.name,
                    timeout_seconds = task.timeout_seconds,
                    "task execution timed out"
                );
                TaskResult::failed(
                    &task.id,
                    started,
                    format!(
                        "Task execution timed out after {} seconds",
                        task.timeout_seconds
                    ),
                )
            }
        }
    }

    async fn run_task_body(
        &self,
        task: ScheduledTask,
        started: chrono::DateTime<Utc>,
    ) -> TaskResult {
        let mut total = SubredditOutcome::default();

        if self.config.max_concurrent_subreddits > 1 && task.subreddits.len() > 1 {
            let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_subreddits));
            let mut handles = Vec::new();

            for subreddit in task.subreddits.clone() {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("semaphore open");
                let this = self.clone();
                let task = task.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    this.process_subreddit(&task, &subreddit).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(outcome) => total.absorb(outcome),
                    Err(e) => total.errors.push(format!("subreddit worker failed: {e}")),
                }
            }
        } else {
            for subreddit in &task.subreddits {
                total.absorb(self.process_subreddit(&task, subreddit).await);
            }
        }

        let status = if !total.errors.is_empty() && total.downloaded == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };

        let mut output = vec![
            format!("Downloaded: {} posts", total.downloaded),
            format!("Skipped: {} posts", total.skipped),
            format!("Subreddits processed: {}", task.subreddits.len()),
        ];
        if !total.errors.is_empty() {
            output.push(format!("Errors: {}", total.errors.len()));
        }

        let error = if total.errors.is_empty() {
            None
        } else {
            Some(
                total
                    .errors
                    .iter()
                    .take(MAX_REPORTED_ERRORS)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        TaskResult {
            task_id: task.id.clone(),
            status,
            started_at: started,
            completed_at: Some(Utc::now()),
            error: error.map(|e| {
                let mut e = e;
                e.truncate(e.chars().take(500).map(char::len_utf8).sum());
                e
            }),
            output: Some(output.join("\n")),
        }
    }

    /// One subreddit: resolve candidates, dedup against the 30-day
    /// window, fetch, render, write, record. Per-URL errors are captured,
    /// never raised.
    async fn process_subreddit(
        &self,
        task: &ScheduledTask,
        subreddit: &str,
    ) -> SubredditOutcome {
        let mut outcome = SubredditOutcome::default();
        info!(subreddit, task = %task.name, "processing subreddit");

        let recent = match self
            .store
            .downloaded_post_ids(subreddit, self.config.dedup_window_days)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                outcome
                    .errors
                    .push(format!("Error processing subreddit {subreddit}: {e}"));
                return outcome;
            }
        };

        let post_urls = match self
            .fetcher
            .subreddit_post_urls(subreddit, task.max_posts_per_subreddit as usize)
            .await
        {
            Ok(urls) => urls,
            Err(e) => {
                outcome
                    .errors
                    .push(format!("Error processing subreddit {subreddit}: {e}"));
                return outcome;
            }
        };

        for url in post_urls
            .iter()
            .take(task.max_posts_per_subreddit as usize)
        {
            let clean = urls::clean_url(url);
            let post_id = urls::post_id_from_url(&clean);

            if recent.contains(&post_id) {
                outcome.skipped += 1;
                debug!(post_id, "skipping already-downloaded post");
                continue;
            }

            if !urls::valid_url(&clean) {
                warn!(url = %clean, "invalid URL");
                outcome.errors.push(format!("Invalid URL: {clean}"));
                continue;
            }

            match self
                .download_one(task, subreddit, &clean, &post_id)
                .await
            {
                Ok(()) => outcome.downloaded += 1,
                Err(e) => {
                    error!(url = %clean, "download failed: {e}");
                    outcome.errors.push(e);
                }
            }

            // Gentle pacing on top of the rate limiter.
            tokio::time::sleep(Duration::from_millis(self.config.per_post_pause_ms)).await;
        }

        outcome
    }

    async fn download_one(
        &self,
        task: &ScheduledTask,
        subreddit: &str,
        url: &str,
        post_id: &str,
    ) -> Result<(), String> {
        let data = self
            .fetcher
            .fetch_post_json(url)
            .await
            .map_err(|e| format!("Error downloading {url}: {e}"))?;

        let listing = data
            .as_array()
            .filter(|l| l.len() >= 2)
            .ok_or_else(|| format!("Invalid data for: {url}"))?;

        let post_data = listing[0]
            .pointer("/data/children/0/data")
            .ok_or_else(|| format!("No post info: {url}"))?;
        let replies: Vec<serde_json::Value> = listing[1]
            .pointer("/data/children")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let markdown = self
            .renderer
            .render_markdown(post_data, &replies, url)
            .map_err(|e| format!("Error downloading {url}: {e}"))?;
        let content = match self.config.file_format {
            FileFormat::Markdown => markdown,
            FileFormat::Html => self.renderer.markdown_to_html(&markdown),
        };

        let target = self
            .save_dir
            .join(subreddit)
            .join(format!("{post_id}.{}", self.config.file_format.extension()));
        write_atomically(&target, &content)
            .await
            .map_err(|e| format!("Error downloading {url}: {e}"))?;

        let title = post_data
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("Untitled");
        let author = post_data
            .get("author")
            .and_then(|v| v.as_str())
            .unwrap_or("[unknown]");

        self.store
            .record_download(&DownloadRecord {
                post_id: post_id.to_string(),
                post_url: url.to_string(),
                subreddit: subreddit.to_string(),
                title: title.to_string(),
                author: author.to_string(),
                downloaded_at: Utc::now(),
                file_path: target.to_string_lossy().to_string(),
                task_id: Some(task.id.clone()),
            })
            .await
            .map_err(|e| format!("Error downloading {url}: {e}"))?;

        info!(post_id, title, "downloaded post");
        Ok(())
    }
}

fn validate_task(task: &ScheduledTask) -> Option<String> {
    if !task.enabled {
        return Some("Task is disabled".to_string());
    }
    if task.subreddits.is_empty() {
        return Some("No subreddits configured".to_string());
    }
    if task.max_posts_per_subreddit == 0 {
        return Some("Invalid max_posts_per_subreddit value".to_string());
    }
    None
}

/// Write via a temp file in the target directory, then rename into place.
async fn write_atomically(target: &std::path::Path, content: &str) -> std::io::Result<()> {
    let parent = target.parent().unwrap_or(std::path::Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let tmp = target.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, target).await
}

/// The execution interface the scheduler drives; object-safe so tests can
/// substitute a scripted executor.
#[async_trait]
pub trait ExecuteTask: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> TaskResult;
}

#[async_trait]
impl ExecuteTask for TaskExecutor {
    async fn execute(&self, task: &ScheduledTask) -> TaskResult {
        self.execute_task(task).await
    }
}
