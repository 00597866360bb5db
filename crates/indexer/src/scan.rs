// crates/indexer/src/scan.rs
//! File discovery, change detection, and task prioritization.

use crate::IndexError;
use snoovault_search::SearchStore;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One candidate file with its scheduling priority.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTask {
    pub path: PathBuf,
    /// Higher runs earlier within a batch.
    pub priority: i32,
    pub size: u64,
    /// Modification time as fractional seconds since epoch.
    pub modified: f64,
}

/// Substring pattern plus the priority bonus it grants.
pub type PriorityPattern = (String, i32);

/// Walk `root` collecting files with one of the wanted extensions.
/// Results are sorted for a deterministic processing order.
pub fn discover_files(
    root: &Path,
    extensions: &[String],
    recursive: bool,
) -> Result<Vec<PathBuf>, IndexError> {
    if !root.exists() {
        return Err(IndexError::RootMissing(root.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in WalkDir::new(root).max_depth(max_depth) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("walk error under {}: {e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| extensions.iter().any(|want| want == ext))
            .unwrap_or(false);
        if matched {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    info!(count = files.len(), root = %root.display(), "discovered candidate files");
    Ok(files)
}

/// Build prioritized tasks, dropping files whose stored modification time
/// is current (unless `force`). Returns `(tasks, unchanged_count)`.
pub async fn create_tasks(
    store: &SearchStore,
    files: Vec<PathBuf>,
    force: bool,
    priority_patterns: &[PriorityPattern],
) -> Result<(Vec<IndexTask>, u64), IndexError> {
    let path_strings: Vec<String> = files
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let stored_times = if force {
        Default::default()
    } else {
        store.file_modified_times(&path_strings).await?
    };

    let mut tasks = Vec::new();
    let mut unchanged = 0u64;

    for path in files {
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                warn!("cannot stat {}: {e}", path.display());
                continue;
            }
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        if !force {
            let key = path.to_string_lossy().to_string();
            if let Some(stored) = stored_times.get(&key) {
                if modified <= *stored {
                    unchanged += 1;
                    continue;
                }
            }
        }

        let size = metadata.len();
        tasks.push(IndexTask {
            priority: file_priority(&path, size, priority_patterns),
            path,
            size,
            modified,
        });
    }

    debug!(
        to_process = tasks.len(),
        unchanged, "change detection complete"
    );
    Ok((tasks, unchanged))
}

/// Pattern bonuses plus a boost for small files (they finish fast and keep
/// progress moving): +10 under 10 KB, +5 under 100 KB.
pub fn file_priority(path: &Path, size: u64, patterns: &[PriorityPattern]) -> i32 {
    let path_str = path.to_string_lossy();
    let mut priority = 0;

    for (pattern, bonus) in patterns {
        if path_str.contains(pattern.as_str()) {
            priority += bonus;
        }
    }

    if size < 10_000 {
        priority += 10;
    } else if size < 100_000 {
        priority += 5;
    }

    priority
}

/// Processing order within a batch: priority descending, then smaller
/// files first.
pub fn sort_tasks(tasks: &mut [IndexTask]) {
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.size.cmp(&b.size)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_discover_filters_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.md", "x");
        write(tmp.path(), "b.html", "x");
        write(tmp.path(), "c.txt", "x");
        write(tmp.path(), "d", "x");

        let files =
            discover_files(tmp.path(), &["md".into(), "html".into()], true).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_discover_recursion_flag() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "top.md", "x");
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        write(&tmp.path().join("sub"), "nested.md", "x");

        let flat = discover_files(tmp.path(), &["md".into()], false).unwrap();
        assert_eq!(flat.len(), 1);

        let deep = discover_files(tmp.path(), &["md".into()], true).unwrap();
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn test_discover_missing_root_errors() {
        assert!(matches!(
            discover_files(Path::new("/no/such/dir"), &["md".into()], true),
            Err(IndexError::RootMissing(_))
        ));
    }

    #[test]
    fn test_priority_size_bonuses() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write(tmp.path(), "a.md", "x");
        assert_eq!(file_priority(&p, 5_000, &[]), 10);
        assert_eq!(file_priority(&p, 50_000, &[]), 5);
        assert_eq!(file_priority(&p, 500_000, &[]), 0);
    }

    #[test]
    fn test_priority_pattern_bonus() {
        let patterns = vec![("rust".to_string(), 20)];
        let p = PathBuf::from("/data/r_rust/post.md");
        assert_eq!(file_priority(&p, 500_000, &patterns), 20);
        assert_eq!(file_priority(&p, 5_000, &patterns), 30);
    }

    #[test]
    fn test_sort_order_priority_then_size() {
        let mk = |priority, size| IndexTask {
            path: PathBuf::from("/x"),
            priority,
            size,
            modified: 0.0,
        };
        let mut tasks = vec![mk(0, 10), mk(10, 500), mk(10, 100), mk(5, 1)];
        sort_tasks(&mut tasks);
        let order: Vec<(i32, u64)> = tasks.iter().map(|t| (t.priority, t.size)).collect();
        assert_eq!(order, vec![(10, 100), (10, 500), (5, 1), (0, 10)]);
    }

    #[tokio::test]
    async fn test_create_tasks_skips_unchanged() {
        let store = SearchStore::open_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "a.md", "content");

        let (tasks, unchanged) =
            create_tasks(&store, vec![path.clone()], false, &[]).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(unchanged, 0);

        // Record the current mtime as indexed, then re-scan.
        let modified = tasks[0].modified;
        store
            .upsert_post(&snoovault_search::NewPost {
                file_path: path.to_string_lossy().to_string(),
                post_id: "aaa111".into(),
                title: "t".into(),
                file_modified_time: modified,
                content: "content".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let (tasks, unchanged) =
            create_tasks(&store, vec![path.clone()], false, &[]).await.unwrap();
        assert!(tasks.is_empty());
        assert_eq!(unchanged, 1);

        // Force bypasses change detection.
        let (tasks, _) = create_tasks(&store, vec![path], true, &[]).await.unwrap();
        assert_eq!(tasks.len(), 1);
    }
}
