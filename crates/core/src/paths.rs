// crates/core/src/paths.rs
//! Filesystem locations: default database paths and save-directory
//! resolution.

use std::path::PathBuf;
use thiserror::Error;

/// Sentinel configuration value that redirects to the environment.
pub const DEFAULT_SAVE_LOCATION_SENTINEL: &str = "DEFAULT_REDDIT_SAVE_LOCATION";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("DEFAULT_REDDIT_SAVE_LOCATION environment variable not set")]
    SaveLocationUnset,

    #[error("failed to determine data directory")]
    NoDataDir,
}

/// Resolve the output root for rendered posts.
///
/// When the configured value is the literal `DEFAULT_REDDIT_SAVE_LOCATION`,
/// the directory comes from the environment variable of the same name; an
/// unset variable is fatal to the caller.
pub fn resolve_save_dir(configured: &str) -> Result<PathBuf, PathError> {
    if configured == DEFAULT_SAVE_LOCATION_SENTINEL {
        match std::env::var(DEFAULT_SAVE_LOCATION_SENTINEL) {
            Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
            _ => Err(PathError::SaveLocationUnset),
        }
    } else {
        Ok(PathBuf::from(configured))
    }
}

/// Default location of the scheduler state database:
/// `<data_dir>/snoovault/scheduler_state.db`.
pub fn default_state_db_path() -> Result<PathBuf, PathError> {
    data_dir().map(|d| d.join("scheduler_state.db"))
}

/// Default location of the search index database:
/// `<data_dir>/snoovault/reddit_search.db`.
pub fn default_search_db_path() -> Result<PathBuf, PathError> {
    data_dir().map(|d| d.join("reddit_search.db"))
}

fn data_dir() -> Result<PathBuf, PathError> {
    dirs::data_dir()
        .map(|d| d.join("snoovault"))
        .ok_or(PathError::NoDataDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_directory_passes_through() {
        let dir = resolve_save_dir("/data/reddit").unwrap();
        assert_eq!(dir, PathBuf::from("/data/reddit"));
    }

    #[test]
    fn test_sentinel_reads_environment() {
        // Serialize env mutation against other tests in this module.
        std::env::set_var(DEFAULT_SAVE_LOCATION_SENTINEL, "/env/reddit");
        let dir = resolve_save_dir(DEFAULT_SAVE_LOCATION_SENTINEL).unwrap();
        assert_eq!(dir, PathBuf::from("/env/reddit"));
        std::env::remove_var(DEFAULT_SAVE_LOCATION_SENTINEL);
    }

    #[test]
    fn test_default_db_paths_end_with_known_names() {
        if let Ok(p) = default_state_db_path() {
            assert!(p.ends_with("snoovault/scheduler_state.db"));
        }
        if let Ok(p) = default_search_db_path() {
            assert!(p.ends_with("snoovault/reddit_search.db"));
        }
    }
}
