// crates/core/src/validate.rs
//! Input validation shared by the stores: file paths, post ids, tag names,
//! colors, and free-text search input.

use regex_lite::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file path must be a non-empty string")]
    EmptyPath,

    #[error("invalid file path: {0}")]
    UnsafePath(String),

    #[error("file path too long ({0} chars)")]
    PathTooLong(usize),

    #[error("post id must be a non-empty string")]
    EmptyPostId,

    #[error("invalid post id format: {0}")]
    InvalidPostId(String),

    #[error("tag name cannot be empty after normalization")]
    EmptyTagName,

    #[error("tag name too long: {0}")]
    TagNameTooLong(String),

    #[error("{what} must be between {min} and {max}, got {value}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Directory prefixes the stores refuse to index or write under.
const BLOCKED_PREFIXES: [&str; 5] = ["/etc/", "/usr/bin/", "/usr/sbin/", "/boot/", "/sys/"];

const MAX_PATH_LEN: usize = 1000;
const MAX_NAME_LEN: usize = 50;

/// Reject traversal sequences (outside the known-safe temp roots), system
/// directories, and over-length paths.
pub fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if path.contains("..") && !(path.contains("/tmp/") || path.contains("/var/folders/")) {
        return Err(ValidationError::UnsafePath(path.to_string()));
    }
    if BLOCKED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return Err(ValidationError::UnsafePath(path.to_string()));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(ValidationError::PathTooLong(path.len()));
    }
    Ok(())
}

/// Reddit post ids: 1–50 chars of `[A-Za-z0-9_-]`.
pub fn validate_post_id(post_id: &str) -> Result<(), ValidationError> {
    if post_id.is_empty() {
        return Err(ValidationError::EmptyPostId);
    }
    if post_id.len() > MAX_NAME_LEN
        || !post_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(ValidationError::InvalidPostId(post_id.to_string()));
    }
    Ok(())
}

/// Lowercase, non-word characters collapsed to `_`, runs of `_` coalesced,
/// leading/trailing `_` trimmed.
pub fn normalize_tag_name(name: &str) -> Result<String, ValidationError> {
    let lowered = name.trim().to_lowercase();
    let mut normalized = String::with_capacity(lowered.len());
    let mut last_was_underscore = false;

    for c in lowered.chars() {
        let keep = c.is_alphanumeric() || c == '-';
        if keep {
            normalized.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            normalized.push('_');
            last_was_underscore = true;
        }
    }

    let normalized = normalized.trim_matches('_').to_string();

    if normalized.is_empty() {
        return Err(ValidationError::EmptyTagName);
    }
    if normalized.len() > MAX_NAME_LEN {
        return Err(ValidationError::TagNameTooLong(normalized));
    }
    Ok(normalized)
}

/// `#RRGGBB` or nothing.
pub fn is_valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Cap length and strip characters that have no place in an FTS query.
pub fn sanitize_search_text(text: &str) -> String {
    let capped: String = text.chars().take(1000).collect();
    let stripped = Regex::new(r#"[^\w\s"*-]"#)
        .expect("static pattern")
        .replace_all(&capped, " ")
        .into_owned();
    let collapsed = Regex::new(r"\s+")
        .expect("static pattern")
        .replace_all(stripped.trim(), " ")
        .into_owned();
    collapsed
}

/// Clamp an optional integer into a range, erroring outside it.
pub fn validate_range(
    what: &'static str,
    value: Option<i64>,
    min: i64,
    max: i64,
) -> Result<Option<i64>, ValidationError> {
    match value {
        None => Ok(None),
        Some(v) if v >= min && v <= max => Ok(Some(v)),
        Some(v) => Err(ValidationError::OutOfRange {
            what,
            value: v,
            min,
            max,
        }),
    }
}

/// Truncate to at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
