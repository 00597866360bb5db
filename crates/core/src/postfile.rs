// crates/core/src/postfile.rs
//! Parser for rendered Reddit post files (the Markdown/HTML the external
//! renderer writes). Recognizes the header shape:
//!
//! ```text
//! **<subreddit>** | Posted by u/<author> ⬆️ <upvotes> _( YYYY-MM-DD HH:MM:SS )_
//! ## <title>
//! Original post: [<url>](<url>)
//! ...content lines...
//! 💬 ~ <N> replies
//! ```

use chrono::{NaiveDateTime, TimeZone, Utc};
use regex_lite::Regex;
use std::path::Path;

const PREVIEW_MAX_LEN: usize = 200;
const SNIFF_LINES: usize = 10;

/// Metadata extracted from one rendered post file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFileMetadata {
    pub subreddit: Option<String>,
    pub author: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub upvotes: i64,
    pub created_utc: Option<i64>,
    pub reply_count: i64,
    pub content_preview: String,
}

/// Rendered-post parser with its regexes compiled once.
pub struct PostFileParser {
    subreddit_author: Regex,
    title: Regex,
    original_url: Regex,
    upvotes: Regex,
    timestamp: Regex,
    reply_count: Regex,
    post_id_in_url: Regex,
    filename_post_id: Regex,
}

impl PostFileParser {
    pub fn new() -> Self {
        Self {
            subreddit_author: Regex::new(r"\*\*(.+?)\*\*\s*\|\s*Posted by u/(\S+)").unwrap(),
            title: Regex::new(r"(?m)^## (.+)$").unwrap(),
            original_url: Regex::new(r"Original post: \[(.+?)\]\((.+?)\)").unwrap(),
            upvotes: Regex::new(r"⬆️\s*(\d+(?:\.\d+)?[kK]?)").unwrap(),
            timestamp: Regex::new(r"_\(\s*(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})\s*\)_").unwrap(),
            reply_count: Regex::new(r"💬 ~ (\d+) replies").unwrap(),
            post_id_in_url: Regex::new(r"/comments/([a-z0-9]+)").unwrap(),
            filename_post_id: Regex::new(r"^[a-z0-9]{6,8}$").unwrap(),
        }
    }

    /// Content sniff: at least two of the three header indicators within
    /// the first ten lines.
    pub fn is_rendered_post(&self, content: &str) -> bool {
        let head: String = content
            .lines()
            .take(SNIFF_LINES)
            .collect::<Vec<_>>()
            .join("\n");

        let header = Regex::new(r"\*\*r/.*\*\*.*Posted by u/").unwrap();
        let reddit_url = Regex::new(r"Original post: \[.*\]\(.*reddit\.com.*\)").unwrap();

        let mut hits = 0;
        if header.is_match(&head) {
            hits += 1;
        }
        if reddit_url.is_match(&head) {
            hits += 1;
        }
        if self.reply_count.is_match(&head) {
            hits += 1;
        }
        hits >= 2
    }

    /// Extract structured metadata. Returns None when no title is present —
    /// the minimum for an indexable post.
    pub fn parse(&self, content: &str) -> Option<PostFileMetadata> {
        let mut meta = PostFileMetadata::default();

        if let Some(caps) = self.subreddit_author.captures(content) {
            meta.subreddit = Some(caps[1].trim().to_string());
            meta.author = Some(caps[2].trim().to_string());
        }

        match self.title.captures(content) {
            Some(caps) => meta.title = caps[1].trim().to_string(),
            None => return None,
        }

        if let Some(caps) = self.original_url.captures(content) {
            meta.url = Some(caps[2].trim().to_string());
        }

        if let Some(caps) = self.upvotes.captures(content) {
            meta.upvotes = parse_upvote_count(&caps[1]);
        }

        if let Some(caps) = self.timestamp.captures(content) {
            meta.created_utc = parse_timestamp(&caps[1]);
        }

        if let Some(caps) = self.reply_count.captures(content) {
            meta.reply_count = caps[1].parse().unwrap_or(0);
        }

        meta.content_preview = self.generate_preview(content);

        Some(meta)
    }

    /// First ~200 chars of non-header content, with links, emphasis,
    /// inline code, and blockquote markers stripped.
    pub fn generate_preview(&self, content: &str) -> String {
        let mut collected: Vec<String> = Vec::new();
        let mut length = 0usize;
        let mut found_content = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                if found_content {
                    break;
                }
                continue;
            }
            if !found_content && self.is_header_line(line) {
                continue;
            }

            found_content = true;
            let cleaned = strip_markdown(line);
            if cleaned.is_empty() {
                continue;
            }
            length += cleaned.chars().count() + 1;
            collected.push(cleaned);
            if length >= PREVIEW_MAX_LEN {
                break;
            }
        }

        let preview = collected.join(" ");
        if preview.is_empty() {
            return "No preview available".to_string();
        }
        if preview.chars().count() > PREVIEW_MAX_LEN {
            let cut: String = preview.chars().take(PREVIEW_MAX_LEN).collect();
            let at_word = cut.rfind(' ').unwrap_or(cut.len());
            format!("{}...", &cut[..at_word])
        } else {
            preview
        }
    }

    fn is_header_line(&self, line: &str) -> bool {
        self.subreddit_author.is_match(line)
            || line.starts_with("## ")
            || line.starts_with("Original post:")
            || self.reply_count.is_match(line)
            || line.chars().all(|c| c == '-') && line.len() >= 3
    }

    /// Post id: from the canonical URL inside the content, else a
    /// 6–8 char alphanumeric segment of the filename, else the file stem.
    pub fn extract_post_id(&self, file_path: &Path, content: &str) -> String {
        if let Some(caps) = self.original_url.captures(content) {
            if let Some(id) = self.post_id_in_url.captures(&caps[2]) {
                return id[1].to_string();
            }
        }

        let stem = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        for part in stem.rsplit('_') {
            if self.filename_post_id.is_match(part) {
                return part.to_string();
            }
        }

        stem
    }
}

impl Default for PostFileParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `150` → 150, `1.2k` → 1200. Unparseable input counts as zero.
pub fn parse_upvote_count(raw: &str) -> i64 {
    let lowered = raw.trim().to_lowercase();
    if let Some(base) = lowered.strip_suffix('k') {
        match base.parse::<f64>() {
            Ok(v) => (v * 1000.0) as i64,
            Err(_) => 0,
        }
    } else {
        lowered.parse().unwrap_or(0)
    }
}

/// `YYYY-MM-DD HH:MM:SS`, assumed UTC, to epoch seconds.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    match NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S") {
        Ok(naive) => Some(Utc.from_utc_datetime(&naive).timestamp()),
        Err(_) => {
            tracing::warn!(raw, "could not parse timestamp");
            None
        }
    }
}

/// Remove links, bold/italic markers, inline code ticks, and blockquote
/// prefixes from one line.
fn strip_markdown(line: &str) -> String {
    let links = Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap();
    let emphasis = Regex::new(r"\*{1,2}([^*]+)\*{1,2}").unwrap();
    let code = Regex::new(r"`([^`]+)`").unwrap();

    let line = line.trim_start_matches('>').trim();
    let line = links.replace_all(line, "$1");
    let line = emphasis.replace_all(&line, "$1");
    let line = code.replace_all(&line, "$1");
    let spaces = Regex::new(r"\s+").unwrap();
    spaces.replace_all(line.trim(), " ").into_owned()
}
