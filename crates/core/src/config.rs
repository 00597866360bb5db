// crates/core/src/config.rs
//! Typed configuration records, one per subsystem, with the documented
//! defaults. Construct with `..Default::default()` and override fields.

/// Scheduler (tick loop, worker pool, admission) configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between tick-loop iterations. Clamped to at least 1.
    pub check_interval_seconds: u64,
    /// Bounded worker pool size for task executions.
    pub max_concurrent_tasks: usize,
    /// Resident-memory ceiling in MB; admission skips above 90% of it.
    pub max_memory_mb: u64,
    /// Run the resource/stuck-task monitoring loop.
    pub enable_monitoring: bool,
    /// Graceful-shutdown wait for in-flight workers.
    pub shutdown_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 30,
            max_concurrent_tasks: 5,
            max_memory_mb: 500,
            enable_monitoring: true,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn normalized(mut self) -> Self {
        self.check_interval_seconds = self.check_interval_seconds.max(1);
        self.max_concurrent_tasks = self.max_concurrent_tasks.max(1);
        self.max_memory_mb = self.max_memory_mb.max(50);
        self
    }
}

/// Executor (per-task download pipeline) configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bounded sub-pool for the concurrent-subreddit mode.
    pub max_concurrent_subreddits: usize,
    /// Dedup lookback window against download history.
    pub dedup_window_days: u32,
    /// Gentle pacing between posts, on top of the rate limiter.
    pub per_post_pause_ms: u64,
    /// Output format for rendered files.
    pub file_format: FileFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Markdown,
    Html,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Markdown => "md",
            FileFormat::Html => "html",
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_subreddits: 3,
            dedup_window_days: 30,
            per_post_pause_ms: 100,
            file_format: FileFormat::Markdown,
        }
    }
}

/// Content indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Worker cap; `None` auto-sizes to `min(cpus, 8)`.
    pub max_workers: Option<usize>,
    /// Files per batch (one store transaction per batch).
    pub batch_size: usize,
    /// System-memory percentage above which the monitor signals throttle.
    pub max_memory_percent: f32,
    /// Extensions considered for indexing.
    pub file_extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            batch_size: 100,
            max_memory_percent: 80.0,
            file_extensions: vec!["md".into(), "html".into()],
            recursive: true,
        }
    }
}

impl IndexerConfig {
    /// Effective worker count: configured cap, else CPU count capped at 8
    /// for I/O-bound work.
    pub fn effective_workers(&self) -> usize {
        match self.max_workers {
            Some(n) => n.max(1),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                cpus.min(8)
            }
        }
    }
}

/// Response-cache configuration (fetched post JSON).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            max_entries: 1000,
        }
    }
}

/// Outbound-fetch rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let c = SchedulerConfig::default();
        assert_eq!(c.check_interval_seconds, 30);
        assert_eq!(c.max_concurrent_tasks, 5);
        assert_eq!(c.max_memory_mb, 500);
        assert!(c.enable_monitoring);
    }

    #[test]
    fn test_scheduler_normalization_floors() {
        let c = SchedulerConfig {
            check_interval_seconds: 0,
            max_concurrent_tasks: 0,
            max_memory_mb: 1,
            ..Default::default()
        }
        .normalized();
        assert_eq!(c.check_interval_seconds, 1);
        assert_eq!(c.max_concurrent_tasks, 1);
        assert_eq!(c.max_memory_mb, 50);
    }

    #[test]
    fn test_indexer_worker_sizing() {
        let auto = IndexerConfig::default();
        let workers = auto.effective_workers();
        assert!(workers >= 1 && workers <= 8);

        let fixed = IndexerConfig {
            max_workers: Some(12),
            ..Default::default()
        };
        assert_eq!(fixed.effective_workers(), 12);
    }

    #[test]
    fn test_executor_defaults() {
        let c = ExecutorConfig::default();
        assert_eq!(c.max_concurrent_subreddits, 3);
        assert_eq!(c.dedup_window_days, 30);
        assert_eq!(c.file_format, FileFormat::Markdown);
    }
}
