//! Store paths.
//!
//! A path is a `/`-separated list of keys. Leading and trailing slashes are
//! ignored and an empty path (or `/`) addresses the root.

use crate::error::{Error, Result};

/// Characters that may not appear in a key.
const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// Maximum key length in bytes.
const MAX_KEY_BYTES: usize = 768;

/// A validated location in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root location.
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse and validate a raw path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for empty segments or keys that contain
    /// `.`, `#`, `$`, `[`, `]` or control characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let segments = trimmed
            .split('/')
            .map(|segment| {
                validate_key(segment).map_err(|reason| Error::invalid_path(raw, reason))?;
                Ok(segment.to_string())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { segments })
    }

    /// The key segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The canonical storage key (no leading or trailing slash).
    #[must_use]
    pub fn key(&self) -> String {
        self.segments.join("/")
    }

    /// The path truncated to its first `depth` segments.
    #[must_use]
    pub fn prefix(&self, depth: usize) -> Self {
        Self {
            segments: self.segments[..depth.min(self.segments.len())].to_vec(),
        }
    }

    /// Keys of every proper ancestor, root first.
    #[must_use]
    pub fn ancestor_keys(&self) -> Vec<String> {
        (0..self.segments.len())
            .map(|depth| self.segments[..depth].join("/"))
            .collect()
    }
}

impl std::fmt::Display for StorePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.key())
    }
}

/// Check a single key.
///
/// # Errors
///
/// Returns the reason the key is not allowed.
pub fn validate_key(key: &str) -> std::result::Result<(), String> {
    if key.is_empty() {
        return Err("empty key".to_string());
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(format!("key longer than {MAX_KEY_BYTES} bytes"));
    }
    if let Some(c) = key.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(format!("key '{key}' contains '{c}'"));
    }
    if key.chars().any(char::is_control) {
        return Err(format!("key '{}' contains a control character", key.escape_debug()));
    }
    Ok(())
}

/// Join a child key onto a storage key.
#[must_use]
pub fn join_key(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let path = StorePath::parse("alerts/child_01").unwrap();
        assert_eq!(path.segments(), ["alerts", "child_01"]);
        assert_eq!(path.key(), "alerts/child_01");
                assert_eq!(path.to_string(), "/alerts/child_01");
    }

    #[test]
    fn test_parse_strips_slashes() {
        let path = StorePath::parse("/alerts/child_01/").unwrap();
        assert_eq!(path.key(), "alerts/child_01");
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(StorePath::parse("/").unwrap(), StorePath::root());
        assert!(StorePath::parse("").unwrap().segments().is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_segment() {
        let err = StorePath::parse("alerts//child_01").unwrap_err();
        assert!(err.to_string().contains("empty key"));
    }

    #[test]
    fn test_parse_rejects_forbidden_characters() {
        for raw in ["alerts/a.b", "alerts/#1", "a$b", "a[0]", "a]"] {
            assert!(StorePath::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_validate_key_control_character() {
        assert!(validate_key("a\nb").is_err());
        assert!(validate_key("child_01").is_ok());
    }

    #[test]
    fn test_validate_key_length() {
        assert!(validate_key(&"k".repeat(768)).is_ok());
        assert!(validate_key(&"k".repeat(769)).is_err());
    }

    #[test]
    fn test_ancestor_keys() {
        let path = StorePath::parse("alerts/child_01/42").unwrap();
        assert_eq!(path.ancestor_keys(), vec!["", "alerts", "alerts/child_01"]);
        assert!(StorePath::root().ancestor_keys().is_empty());
    }

    #[test]
    fn test_prefix() {
        let path = StorePath::parse("alerts/child_01/42/status").unwrap();
        assert_eq!(path.prefix(3).key(), "alerts/child_01/42");
        assert_eq!(path.prefix(10).key(), path.key());
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "alerts"), "alerts");
        assert_eq!(join_key("alerts", "child_01"), "alerts/child_01");
    }
}
