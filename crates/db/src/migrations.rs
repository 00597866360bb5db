// crates/db/src/migrations.rs
// Inline schema migrations, applied in order and tracked by version in
// the _migrations table.

pub(crate) const MIGRATIONS: &[&str] = &[
    // 1: scheduled tasks
    r#"CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        cron_expression TEXT NOT NULL,
        subreddits TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        max_posts_per_subreddit INTEGER NOT NULL DEFAULT 25,
        retry_count INTEGER NOT NULL DEFAULT 3,
        retry_delay_seconds INTEGER NOT NULL DEFAULT 60,
        timeout_seconds INTEGER NOT NULL DEFAULT 3600,
        created_at TEXT NOT NULL,
        last_run TEXT,
        next_run TEXT,
        last_result TEXT,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )"#,
    // 2: download history
    r#"CREATE TABLE IF NOT EXISTS download_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        post_id TEXT NOT NULL,
        post_url TEXT NOT NULL,
        subreddit TEXT NOT NULL,
        title TEXT NOT NULL,
        author TEXT NOT NULL,
        downloaded_at TEXT NOT NULL,
        file_path TEXT NOT NULL,
        task_id TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (task_id) REFERENCES scheduled_tasks (id) ON DELETE SET NULL
    )"#,
    // 3-6: query-path indexes
    "CREATE INDEX IF NOT EXISTS idx_download_history_post_id
        ON download_history (post_id)",
    "CREATE INDEX IF NOT EXISTS idx_download_history_subreddit
        ON download_history (subreddit, downloaded_at)",
    "CREATE INDEX IF NOT EXISTS idx_download_history_task_id
        ON download_history (task_id, downloaded_at)",
    "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_next_run
        ON scheduled_tasks (next_run, enabled)",
];
