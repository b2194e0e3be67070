//! C2: path normalization, glob matching, and content tagging.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Collapse duplicate slashes and remove leading/trailing slashes. Rejects
/// traversal by caller convention — callers should reject `..`/`./`
/// segments before calling; this function only normalizes shape.
pub fn normalize_storage_path(path: &str) -> String {
    let collapsed: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    collapsed.join("/")
}

/// Like [`normalize_storage_path`], but preserves the convention that a
/// file-system path may have started with `/`.
pub fn normalize_file_path(path: &str) -> String {
    normalize_storage_path(path.trim_start_matches('/'))
}

/// Reject obvious traversal attempts: `..` segments, a `./` segment, or a
/// URL-encoded traversal sequence.
pub fn has_traversal(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    if lowered.contains("%2e%2e") || lowered.contains("%2f") {
        return true;
    }
    path.split('/').any(|seg| seg == ".." || seg == ".")
}

/// Normalize a prefix to the trailing-`/` convention used by
/// [`apply_prefix`]/[`strip_prefix`]: empty stays empty, non-empty always
/// ends in exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = normalize_storage_path(prefix);
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Join a normalized prefix onto a relative path.
pub fn apply_prefix(prefix: &str, path: &str) -> String {
    format!("{}{}", normalize_prefix(prefix), normalize_storage_path(path))
}

/// Remove `prefix` from `path` if present, returning the remainder with no
/// leading slash.
pub fn strip_prefix<'a>(prefix: &str, path: &'a str) -> &'a str {
    let prefix = normalize_prefix(prefix);
    path.strip_prefix(&prefix).unwrap_or(path)
}

static GLOB_CACHE: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);

/// Compile a glob pattern (`*` → any run of characters, `?` → any single
/// character, everything else escaped) into an anchored regex. Compiled
/// patterns are cached since path matching sits on the `list` hot path.
pub fn compile_glob(pattern: &str) -> Regex {
    if let Some(cached) = GLOB_CACHE.get(pattern) {
        return cached.clone();
    }
    let mut regex_src = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex_src.push_str(".*"),
            '?' => regex_src.push('.'),
            c => regex_src.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_src.push('$');
    let compiled = Regex::new(&regex_src).expect("glob translation always yields valid regex");
    GLOB_CACHE.insert(pattern.to_string(), compiled.clone());
    compiled
}

/// `true` if `path` matches the glob `pattern`.
pub fn glob_matches(pattern: &str, path: &str) -> bool {
    compile_glob(pattern).is_match(path)
}

/// Which content-tag scheme to use when minting a tag for a freshly
/// written blob (§4.1, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    /// `hash-timestamp`: suits mutable objects, changes on every write even
    /// if the content is unchanged.
    TimeTagged,
    /// `hash-size`: stable across instances for identical content, suited
    /// to content-addressed artifacts and dedupe.
    Deterministic,
}

/// Compute a content tag for `bytes` under the given [`TagMode`].
pub fn content_tag(bytes: &[u8], mode: TagMode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let short_hash = hex_prefix(&digest, 16);
    match mode {
        TagMode::Deterministic => format!("{short_hash}-{}", bytes.len()),
        TagMode::TimeTagged => {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before Unix epoch")
                .as_millis();
            format!("{short_hash}-{now_ms}")
        }
    }
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_duplicate_and_trailing_slashes() {
        assert_eq!(normalize_storage_path("a//b///c/"), "a/b/c");
        assert_eq!(normalize_storage_path("/a/b/"), "a/b");
        assert_eq!(normalize_storage_path(""), "");
    }

    #[test]
    fn file_path_also_strips_leading_slash() {
        assert_eq!(normalize_file_path("/a/b"), "a/b");
    }

    #[test]
    fn detects_traversal_attempts() {
        assert!(has_traversal("a/../b"));
        assert!(has_traversal("./a"));
        assert!(has_traversal("a/%2e%2e/b"));
        assert!(!has_traversal("a/b.c"));
    }

    #[test]
    fn prefix_round_trips() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("events"), "events/");
        assert_eq!(normalize_prefix("events/"), "events/");
        assert_eq!(apply_prefix("events", "batch-1.parquet"), "events/batch-1.parquet");
        assert_eq!(strip_prefix("events", "events/batch-1.parquet"), "batch-1.parquet");
        assert_eq!(strip_prefix("events", "other/batch-1.parquet"), "other/batch-1.parquet");
    }

    #[test]
    fn glob_translates_wildcards() {
        assert!(glob_matches("events/*.parquet", "events/batch-1.parquet"));
        assert!(!glob_matches("events/*.parquet", "events/sub/batch-1.parquet"));
        assert!(glob_matches("snapshots/?.bin", "snapshots/1.bin"));
        assert!(!glob_matches("snapshots/?.bin", "snapshots/12.bin"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        assert!(glob_matches("a.b", "a.b"));
        assert!(!glob_matches("a.b", "aXb"));
    }

    #[test]
    fn deterministic_tag_is_stable_for_identical_content() {
        let bytes = b"hello world".to_vec();
        let a = content_tag(&bytes, TagMode::Deterministic);
        let b = content_tag(&bytes, TagMode::Deterministic);
        assert_eq!(a, b);
    }

    #[test]
    fn time_tagged_differs_across_calls_in_practice() {
        let bytes = b"hello world".to_vec();
        let a = content_tag(&bytes, TagMode::TimeTagged);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = content_tag(&bytes, TagMode::TimeTagged);
        // Same content hash prefix, but the timestamp suffix should differ.
        assert_ne!(a, b);
    }

    #[test]
    fn deterministic_tag_differs_for_different_sizes() {
        let a = content_tag(b"short", TagMode::Deterministic);
        let b = content_tag(b"a bit longer input", TagMode::Deterministic);
        assert_ne!(a, b);
    }
}
