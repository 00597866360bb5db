// crates/indexer/src/lib.rs
//! Parallel content indexer: walks a corpus of rendered Reddit posts,
//! detects changes by modification time, ingests prioritized batches
//! under memory back-pressure, and sweeps deleted files out of the index.

pub mod batch;
pub mod monitor;
pub mod scan;

pub use batch::BatchStats;
pub use monitor::ResourceMonitor;
pub use scan::{IndexTask, PriorityPattern};

use snoovault_core::config::IndexerConfig;
use snoovault_core::postfile::PostFileParser;
use snoovault_search::{SearchError, SearchStore};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("directory does not exist: {0}")]
    RootMissing(PathBuf),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Aggregate statistics for one indexing run.
#[derive(Debug, Clone, Default)]
pub struct IndexRunStats {
    pub processed: u64,
    pub indexed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub total_files: u64,
    pub batches_completed: u64,
    pub deleted_cleaned: u64,
    pub elapsed: Duration,
}

/// Per-batch progress snapshot handed to callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexProgress {
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    /// Files per second since the run started.
    pub rate: f64,
    pub eta_seconds: f64,
}

type ProgressCallback = Box<dyn Fn(IndexProgress) + Send + Sync>;

/// The indexing engine. Clone the underlying store freely; one indexer
/// drives one run at a time.
pub struct ContentIndexer {
    store: SearchStore,
    config: IndexerConfig,
    parser: Arc<PostFileParser>,
    monitor: Arc<ResourceMonitor>,
    progress_callbacks: Vec<ProgressCallback>,
}

impl ContentIndexer {
    pub fn new(store: SearchStore, config: IndexerConfig) -> Self {
        let monitor = Arc::new(ResourceMonitor::new(config.max_memory_percent));
        Self {
            store,
            config,
            parser: Arc::new(PostFileParser::new()),
            monitor,
            progress_callbacks: Vec::new(),
        }
    }

    pub fn store(&self) -> &SearchStore {
        &self.store
    }

    /// Register a per-batch progress callback.
    pub fn add_progress_callback(
        &mut self,
        callback: impl Fn(IndexProgress) + Send + Sync + 'static,
    ) {
        self.progress_callbacks.push(Box::new(callback));
    }

    /// Index every candidate file under `root`, then sweep deleted files.
    ///
    /// `force` bypasses modification-time change detection;
    /// `priority_patterns` grant a bonus to paths containing a substring.
    pub async fn index_directory(
        &self,
        root: &Path,
        force: bool,
        priority_patterns: &[PriorityPattern],
    ) -> Result<IndexRunStats, IndexError> {
        let started = Instant::now();
        info!(root = %root.display(), force, "starting indexing run");

        let files = scan::discover_files(
            root,
            &self.config.file_extensions,
            self.config.recursive,
        )?;
        let candidate_count = files.len() as u64;

        let (tasks, unchanged) =
            scan::create_tasks(&self.store, files, force, priority_patterns).await?;

        let mut stats = IndexRunStats {
            total_files: candidate_count,
            skipped: unchanged,
            ..Default::default()
        };

        if !tasks.is_empty() {
            let batch_stats = self.process_tasks(tasks, candidate_count, started).await?;
            stats.processed = batch_stats.0.processed;
            stats.indexed = batch_stats.0.indexed;
            stats.updated = batch_stats.0.updated;
            stats.skipped += batch_stats.0.skipped;
            stats.failed = batch_stats.0.failed;
            stats.batches_completed = batch_stats.1;
        }

        stats.deleted_cleaned = self.cleanup_deleted(root).await?;
        stats.elapsed = started.elapsed();

        info!(
            processed = stats.processed,
            indexed = stats.indexed,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "indexing run complete"
        );
        Ok(stats)
    }

    /// Dispatch batches across the worker pool, pausing briefly between
    /// dispatches when the monitor signals memory pressure.
    async fn process_tasks(
        &self,
        tasks: Vec<IndexTask>,
        total_files: u64,
        started: Instant,
    ) -> Result<(BatchStats, u64), IndexError> {
        let workers = self.config.effective_workers();
        let batch_size = self.config.batch_size.max(1);
        info!(tasks = tasks.len(), workers, batch_size, "processing tasks");

        Arc::clone(&self.monitor).start();

        let combined = Arc::new(Mutex::new(BatchStats::default()));
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::new();
        let mut batches_completed = 0u64;

        let mut batches: Vec<Vec<IndexTask>> = Vec::new();
        let mut tasks = tasks;
        while !tasks.is_empty() {
            let rest = tasks.split_off(tasks.len().min(batch_size));
            batches.push(std::mem::replace(&mut tasks, rest));
        }

        for batch in batches {
            if self.monitor.should_throttle() {
                warn!("throttling batch dispatch due to memory pressure");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore open");
            let store = self.store.clone();
            let parser = Arc::clone(&self.parser);
            let combined = Arc::clone(&combined);

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match batch::process_batch(&store, &parser, batch).await {
                    Ok(stats) => {
                        combined.lock().unwrap().merge(stats);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {
                    batches_completed += 1;
                    self.report_progress(&combined, total_files, started);
                }
                Ok(Err(e)) => error!("batch processing failed: {e}"),
                Err(e) => error!("batch worker panicked: {e}"),
            }
        }

        self.monitor.stop();

        let stats = *combined.lock().unwrap();
        Ok((stats, batches_completed))
    }

    fn report_progress(
        &self,
        combined: &Arc<Mutex<BatchStats>>,
        total: u64,
        started: Instant,
    ) {
        let processed = combined.lock().unwrap().processed;
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        };
        let remaining = total.saturating_sub(processed);
        let progress = IndexProgress {
            processed,
            total,
            percent: processed as f64 / total.max(1) as f64 * 100.0,
            rate,
            eta_seconds: if rate > 0.0 {
                remaining as f64 / rate
            } else {
                0.0
            },
        };

        for callback in &self.progress_callbacks {
            callback(progress.clone());
        }
    }

    /// Remove index rows whose files disappeared from under `root`.
    async fn cleanup_deleted(&self, root: &Path) -> Result<u64, IndexError> {
        let root_str = root.to_string_lossy().to_string();
        let indexed_paths = self.store.paths_under_root(&root_str).await?;

        let mut removed = 0u64;
        for path in indexed_paths {
            if !Path::new(&path).exists() {
                if self.store.delete_post_by_path(&path).await? {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, "cleaned up deleted files from index");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn rendered_post(post_id: &str, body: &str) -> String {
        format!(
            "**r/rust** | Posted by u/ferris ⬆️ 42 _( 2024-03-01 12:30:00 )_\n\
             ## Post {post_id}\n\
             Original post: [https://www.reddit.com/r/rust/comments/{post_id}/t/](https://www.reddit.com/r/rust/comments/{post_id}/t/)\n\
             \n\
             {body}\n\
             \n\
             💬 ~ 3 replies\n"
        )
    }

    async fn new_indexer() -> ContentIndexer {
        let store = SearchStore::open_in_memory().await.unwrap();
        ContentIndexer::new(store, IndexerConfig::default())
    }

    fn write_posts(dir: &Path, n: usize) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let path = dir.join(format!("post{i}.md"));
                std::fs::write(&path, rendered_post(&format!("abcd{i:02}"), "body text"))
                    .unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_incremental_reindexing_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = new_indexer().await;
        let paths = write_posts(tmp.path(), 5);

        // First run indexes everything.
        let stats = indexer.index_directory(tmp.path(), false, &[]).await.unwrap();
        assert_eq!(stats.indexed, 5);
        assert_eq!(stats.total_files, 5);

        // No changes: everything is skipped by change detection.
        let stats = indexer.index_directory(tmp.path(), false, &[]).await.unwrap();
        assert_eq!(stats.indexed, 0);
        assert_eq!(stats.skipped, 5);

        // Touch one file with new content.
        std::fs::write(&paths[2], rendered_post("abcd02", "body text plus a new line"))
            .unwrap();
        filetime_bump(&paths[2]);
        let stats = indexer.index_directory(tmp.path(), false, &[]).await.unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.skipped, 4);

        // Delete one file: its row (and shadow) must go away.
        std::fs::remove_file(&paths[3]).unwrap();
        let stats = indexer.index_directory(tmp.path(), false, &[]).await.unwrap();
        assert_eq!(stats.deleted_cleaned, 1);

        let remaining = indexer
            .store()
            .paths_under_root(&tmp.path().to_string_lossy())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 4);

        let orphans: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM posts_fts WHERE rowid NOT IN (SELECT id FROM posts)",
        )
        .fetch_one(indexer.store().pool())
        .await
        .unwrap();
        assert_eq!(orphans.0, 0);
    }

    // Push the mtime forward so change detection sees the rewrite even on
    // filesystems with coarse timestamps.
    fn filetime_bump(path: &Path) {
        let later = std::time::SystemTime::now() + Duration::from_secs(5);
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_times(
            std::fs::FileTimes::new().set_accessed(later).set_modified(later),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_force_reindex_counts_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = new_indexer().await;
        write_posts(tmp.path(), 3);

        indexer.index_directory(tmp.path(), false, &[]).await.unwrap();
        let stats = indexer.index_directory(tmp.path(), true, &[]).await.unwrap();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.updated, 3, "unchanged content under force counts as updated");
        assert_eq!(stats.indexed, 0);
    }

    #[tokio::test]
    async fn test_progress_callbacks_fire_per_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SearchStore::open_in_memory().await.unwrap();
        let config = IndexerConfig {
            batch_size: 2,
            max_workers: Some(2),
            ..Default::default()
        };
        let mut indexer = ContentIndexer::new(store, config);

        let calls = Arc::new(AtomicU64::new(0));
        let last_processed = Arc::new(AtomicU64::new(0));
        let calls_clone = Arc::clone(&calls);
        let last_clone = Arc::clone(&last_processed);
        indexer.add_progress_callback(move |p| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            last_clone.store(p.processed, Ordering::SeqCst);
            assert!(p.percent <= 100.0);
        });

        write_posts(tmp.path(), 5);
        indexer.index_directory(tmp.path(), false, &[]).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3, "one callback per batch");
        assert_eq!(last_processed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_missing_root_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let indexer = new_indexer().await;
        let missing = tmp.path().join("absent");
        assert!(matches!(
            indexer.index_directory(&missing, false, &[]).await,
            Err(IndexError::RootMissing(_))
        ));
    }
}
