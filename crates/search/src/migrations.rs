// crates/search/src/migrations.rs
// Search index schema: posts, the FTS5 shadow, tags, the junction table,
// composite indexes, and the usage-count triggers.

pub(crate) const MIGRATIONS: &[&str] = &[
    // 1: posts metadata
    r#"CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT UNIQUE NOT NULL,
        post_id TEXT NOT NULL,
        title TEXT NOT NULL,
        author TEXT,
        subreddit TEXT,
        url TEXT,
        created_utc INTEGER,
        upvotes INTEGER DEFAULT 0,
        reply_count INTEGER DEFAULT 0,
        file_modified_time REAL,
        indexed_time REAL DEFAULT (strftime('%s', 'now')),
        content_preview TEXT,
        content_hash TEXT
    )"#,
    // 2: full-text shadow, addressed by the posts rowid
    r#"CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
        post_id,
        title,
        content,
        author,
        subreddit,
        tokenize='porter unicode61 remove_diacritics 1'
    )"#,
    // 3: tags
    r#"CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        description TEXT,
        color TEXT,
        created_time REAL DEFAULT (strftime('%s', 'now')),
        usage_count INTEGER DEFAULT 0
    )"#,
    // 4: post-tag junction
    r#"CREATE TABLE IF NOT EXISTS post_tags (
        post_id INTEGER,
        tag_id INTEGER,
        created_time REAL DEFAULT (strftime('%s', 'now')),
        PRIMARY KEY (post_id, tag_id),
        FOREIGN KEY (post_id) REFERENCES posts (id) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE
    )"#,
    // 5-13: single-column and composite indexes
    "CREATE INDEX IF NOT EXISTS idx_posts_subreddit ON posts(subreddit)",
    "CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author)",
    "CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created_utc)",
    "CREATE INDEX IF NOT EXISTS idx_posts_upvotes ON posts(upvotes)",
    "CREATE INDEX IF NOT EXISTS idx_posts_file_modified ON posts(file_modified_time)",
    "CREATE INDEX IF NOT EXISTS idx_posts_post_id ON posts(post_id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_subreddit_upvotes ON posts(subreddit, upvotes DESC)",
    "CREATE INDEX IF NOT EXISTS idx_posts_author_created ON posts(author, created_utc DESC)",
    "CREATE INDEX IF NOT EXISTS idx_posts_created_upvotes ON posts(created_utc DESC, upvotes DESC)",
    // 14-15: tag indexes
    "CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name)",
    "CREATE INDEX IF NOT EXISTS idx_tags_usage ON tags(usage_count DESC)",
    // 16-17: usage_count maintenance
    r#"CREATE TRIGGER IF NOT EXISTS update_tag_usage_insert
       AFTER INSERT ON post_tags
       BEGIN
           UPDATE tags SET usage_count = usage_count + 1 WHERE id = NEW.tag_id;
       END"#,
    r#"CREATE TRIGGER IF NOT EXISTS update_tag_usage_delete
       AFTER DELETE ON post_tags
       BEGIN
           UPDATE tags SET usage_count = usage_count - 1 WHERE id = OLD.tag_id;
       END"#,
];
