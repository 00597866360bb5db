// crates/indexer/src/batch.rs
//! Batch ingestion: one store transaction per batch with a checkpoint
//! commit every 50 completions.

use crate::scan::{sort_tasks, IndexTask};
use crate::IndexError;
use snoovault_core::postfile::PostFileParser;
use snoovault_search::{NewPost, SearchStore, UpsertOutcome};
use std::path::Path;
use tracing::{debug, error};

const CHECKPOINT_EVERY: usize = 50;

/// Per-file outcomes accumulated over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: u64,
    pub indexed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl BatchStats {
    pub fn merge(&mut self, other: BatchStats) {
        self.processed += other.processed;
        self.indexed += other.indexed;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum FileOutcome {
    Indexed,
    Updated,
    Skipped,
    Failed,
}

/// Process one batch: sort by priority, run every task inside a shared
/// immediate transaction, committing a checkpoint every 50 completions.
/// Individual file failures are counted, never raised.
pub async fn process_batch(
    store: &SearchStore,
    parser: &PostFileParser,
    mut tasks: Vec<IndexTask>,
) -> Result<BatchStats, IndexError> {
    let mut stats = BatchStats::default();
    if tasks.is_empty() {
        return Ok(stats);
    }

    sort_tasks(&mut tasks);

    let mut tx = store.begin_immediate().await?;
    let mut since_checkpoint = 0usize;

    for task in &tasks {
        let outcome = match process_file(store, parser, &mut tx, task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("failed to process {}: {e}", task.path.display());
                FileOutcome::Failed
            }
        };

        stats.processed += 1;
        match outcome {
            FileOutcome::Indexed => stats.indexed += 1,
            FileOutcome::Updated => stats.updated += 1,
            FileOutcome::Skipped => stats.skipped += 1,
            FileOutcome::Failed => stats.failed += 1,
        }

        since_checkpoint += 1;
        if since_checkpoint >= CHECKPOINT_EVERY {
            tx.commit().await?;
            tx = store.begin_immediate().await?;
            since_checkpoint = 0;
        }
    }

    tx.commit().await?;

    debug!(?stats, "batch processed");
    Ok(stats)
}

async fn process_file(
    store: &SearchStore,
    parser: &PostFileParser,
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    task: &IndexTask,
) -> Result<FileOutcome, IndexError> {
    let bytes = match tokio::fs::read(&task.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("cannot read {}: {e}", task.path.display());
            return Ok(FileOutcome::Failed);
        }
    };

    // Undecodable files are corrupt or binary, not merely foreign.
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(_) => {
            debug!("{} is not valid UTF-8", task.path.display());
            return Ok(FileOutcome::Failed);
        }
    };

    if !parser.is_rendered_post(&content) {
        debug!("{} is not a rendered post, skipping", task.path.display());
        return Ok(FileOutcome::Skipped);
    }

    let Some(meta) = parser.parse(&content) else {
        debug!("could not parse metadata from {}", task.path.display());
        return Ok(FileOutcome::Failed);
    };

    let post = NewPost {
        file_path: task.path.to_string_lossy().to_string(),
        post_id: parser.extract_post_id(Path::new(&task.path), &content),
        title: meta.title,
        author: meta.author,
        subreddit: meta.subreddit,
        url: meta.url,
        created_utc: meta.created_utc,
        upvotes: meta.upvotes,
        reply_count: meta.reply_count,
        file_modified_time: task.modified,
        content_preview: meta.content_preview,
        content,
    };

    let (_, outcome) = store.upsert_post_tx(tx, &post).await?;
    Ok(match outcome {
        UpsertOutcome::Inserted => FileOutcome::Indexed,
        UpsertOutcome::Updated | UpsertOutcome::Unchanged => FileOutcome::Updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

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

    fn task_for(path: PathBuf) -> IndexTask {
        let meta = std::fs::metadata(&path).unwrap();
        IndexTask {
            priority: 0,
            size: meta.len(),
            modified: meta
                .modified()
                .unwrap()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_secs_f64(),
            path,
        }
    }

    #[tokio::test]
    async fn test_batch_counts_outcomes() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let parser = PostFileParser::new();
        let tmp = tempfile::tempdir().unwrap();

        let good = tmp.path().join("good.md");
        std::fs::write(&good, rendered_post("aaa111", "real body")).unwrap();

        let plain = tmp.path().join("notes.md");
        std::fs::write(&plain, "# Just some notes\n").unwrap();

        let binary = tmp.path().join("junk.md");
        std::fs::write(&binary, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let stats = process_batch(
            &store,
            &parser,
            vec![
                task_for(good.clone()),
                task_for(plain),
                task_for(binary),
            ],
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 1);

        let row = store
            .post_by_file_path(&good.to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.post_id, "aaa111");
        assert_eq!(row.upvotes, 42);
    }

    #[tokio::test]
    async fn test_reprocessing_same_file_counts_updated() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let parser = PostFileParser::new();
        let tmp = tempfile::tempdir().unwrap();

        let path = tmp.path().join("p.md");
        std::fs::write(&path, rendered_post("bbb222", "v1")).unwrap();

        let stats = process_batch(&store, &parser, vec![task_for(path.clone())])
            .await
            .unwrap();
        assert_eq!(stats.indexed, 1);

        std::fs::write(&path, rendered_post("bbb222", "v2 with more text")).unwrap();
        let stats = process_batch(&store, &parser, vec![task_for(path)])
            .await
            .unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.indexed, 0);
    }

    #[tokio::test]
    async fn test_large_batch_checkpoints() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let parser = PostFileParser::new();
        let tmp = tempfile::tempdir().unwrap();

        let mut tasks = Vec::new();
        for i in 0..120 {
            let path = tmp.path().join(format!("p{i:03}.md"));
            std::fs::write(&path, rendered_post(&format!("id{i:03}x"), "body")).unwrap();
            tasks.push(task_for(path));
        }

        let stats = process_batch(&store, &parser, tasks).await.unwrap();
        assert_eq!(stats.processed, 120);
        assert_eq!(stats.indexed, 120);
    }
}
