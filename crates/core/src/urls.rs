// crates/core/src/urls.rs
//! Reddit URL handling: cleaning, shape validation, and post-id extraction.

use md5::{Digest, Md5};
use regex_lite::Regex;

/// Strip tracking query parameters (`?utm_source` and everything after).
pub fn clean_url(url: &str) -> String {
    let trimmed = url.trim();
    match trimmed.find("?utm_source") {
        Some(idx) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Shape check for a Reddit post URL.
pub fn valid_url(url: &str) -> bool {
    let pattern = Regex::new(
        r"^https?://(www\.)?(old\.)?reddit\.com/r/[\w\-]+/comments/[a-z0-9]+(/\S*)?$",
    )
    .unwrap();
    pattern.is_match(url) || Regex::new(r"^https?://redd\.it/[a-z0-9]+/?$").unwrap().is_match(url)
}

/// Extract the post id from a URL: `/comments/<id>/`, `redd.it/<id>`, or a
/// 12-char MD5 of the URL as the last resort.
pub fn post_id_from_url(url: &str) -> String {
    let comments = Regex::new(r"/comments/([a-zA-Z0-9]+)").unwrap();
    if let Some(caps) = comments.captures(url) {
        return caps[1].to_string();
    }
    let shortlink = Regex::new(r"redd\.it/([a-zA-Z0-9]+)").unwrap();
    if let Some(caps) = shortlink.captures(url) {
        return caps[1].to_string();
    }

    let digest = Md5::digest(url.as_bytes());
    hex::encode(digest)[..12].to_string()
}
