//! Key paths addressing values in the remote tree.

use serde::Serialize;
use std::fmt;

/// An ordered sequence of path segments addressing one location in
/// the database tree.
///
/// Accepts either a pre-split sequence of segments or a single
/// `/`-separated string. Serializes as a JSON array of strings, which
/// is the shape the server expects in `keyPath` arguments.
///
/// # Examples
///
/// ```rust
/// use zephyr_link::KeyPath;
///
/// let from_str = KeyPath::from("users/alice/posts");
/// let from_vec = KeyPath::from(vec!["users", "alice", "posts"]);
/// assert_eq!(from_str, from_vec);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Build a key path from already-split segments.
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// The path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        Self(path.split('/').map(str::to_owned).collect())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(segments: Vec<&str>) -> Self {
        Self(segments.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for KeyPath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| (*s).to_owned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_slash() {
        let path = KeyPath::from("users/alice/posts");
        assert_eq!(path.segments(), ["users", "alice", "posts"]);
    }

    #[test]
    fn test_presplit_segments_kept_verbatim() {
        let path = KeyPath::from(vec!["users", "a/b"]);
        assert_eq!(path.segments(), ["users", "a/b"]);
    }

    #[test]
    fn test_serializes_as_json_array() {
        let path = KeyPath::from("a/b");
        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            serde_json::json!(["a", "b"])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyPath::from(vec!["a", "b"]).to_string(), "a/b");
    }
}
