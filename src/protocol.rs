//! Wire types for the ZephyrDB command protocol.
//!
//! Outbound envelopes carry `{c, id, a}` (command, request id,
//! arguments); inbound replies carry `{id, s, r}` (request id,
//! success flag, result or error payload). Both travel JSON-encoded
//! and escaped inside `|`-joined batches (see [`crate::frame`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating a reply to its request.
///
/// Allocated by the dispatch primitive, strictly increasing from 1
/// for the lifetime of a client instance (reconnects do not reset
/// the counter), and never reused while an entry for it is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw id value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw u64 representation.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// One outbound request, pre-escape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Command name, e.g. `create` or `on`.
    #[serde(rename = "c")]
    pub command: String,
    /// Request id.
    pub id: RequestId,
    /// Command arguments, arbitrary JSON.
    #[serde(rename = "a")]
    pub args: serde_json::Value,
}

/// One inbound reply, post-unescape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerReply {
    /// Id of the request this reply answers.
    pub id: RequestId,
    /// Whether the command succeeded.
    #[serde(rename = "s")]
    pub success: bool,
    /// Result payload on success, error payload otherwise.
    #[serde(rename = "r", default)]
    pub result: serde_json::Value,
}

/// Commands whose correlation entry survives past the first reply.
const REPEATING_COMMANDS: &[&str] = &["get", "on", "watch", "size", "sort"];

/// Whether `command` registers a persistent (repeating) handle.
pub fn is_repeating(command: &str) -> bool {
    REPEATING_COMMANDS.contains(&command)
}

/// Segment-splitting rule for the `sort` command.
#[derive(Debug, Clone, Serialize)]
pub struct SortSplit {
    /// Character separating the sortable suffix within a key.
    #[serde(rename = "char")]
    pub separator: String,
    /// Which split field to sort by.
    pub num: u32,
}

impl Default for SortSplit {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
            num: 1,
        }
    }
}

/// Result paging for the `sort` command.
#[derive(Debug, Clone, Serialize)]
pub struct SortPage {
    /// Maximum number of entries to return.
    pub count: u32,
    /// Offset of the first entry.
    pub start: u32,
    /// `asc` or `desc`.
    pub order: String,
}

impl Default for SortPage {
    fn default() -> Self {
        Self {
            count: 10,
            start: 0,
            order: "asc".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope {
            command: "create".to_string(),
            id: RequestId::new(7),
            args: json!({"keyPath": ["a", "b"], "value": {"x": 1}, "w": true}),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"c": "create", "id": 7, "a": {"keyPath": ["a", "b"], "value": {"x": 1}, "w": true}})
        );
    }

    #[test]
    fn test_reply_wire_shape() {
        let reply: ServerReply =
            serde_json::from_str(r#"{"id":3,"s":false,"r":"not found"}"#).unwrap();
        assert_eq!(reply.id, RequestId::new(3));
        assert!(!reply.success);
        assert_eq!(reply.result, json!("not found"));
    }

    #[test]
    fn test_reply_result_defaults_to_null() {
        let reply: ServerReply = serde_json::from_str(r#"{"id":1,"s":true}"#).unwrap();
        assert_eq!(reply.result, serde_json::Value::Null);
    }

    #[test]
    fn test_repeating_commands() {
        for cmd in ["get", "on", "watch", "size", "sort"] {
            assert!(is_repeating(cmd), "{cmd} should repeat");
        }
        for cmd in ["create", "update", "delete", "ping", "stop", "run"] {
            assert!(!is_repeating(cmd), "{cmd} should not repeat");
        }
    }

    #[test]
    fn test_sort_defaults_match_server_expectations() {
        assert_eq!(
            serde_json::to_value(SortSplit::default()).unwrap(),
            json!({"char": "_", "num": 1})
        );
        assert_eq!(
            serde_json::to_value(SortPage::default()).unwrap(),
            json!({"count": 10, "start": 0, "order": "asc"})
        );
    }
}
