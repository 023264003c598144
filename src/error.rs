//! Error types for zephyr-link.

use thiserror::Error;

/// Errors surfaced by the ZephyrDB client.
#[derive(Error, Debug)]
pub enum ZephyrLinkError {
    /// The request payload could not be made delimiter-safe. Raised
    /// synchronously from dispatch; nothing is enqueued or sent.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A transport-level failure (connect, send, or the connection
    /// task being gone).
    #[error("transport error: {0}")]
    TransportError(String),

    /// The server answered the request with `s: false`. Carries the
    /// server-supplied error payload verbatim.
    #[error("server rejected request: {0}")]
    ServerRejected(serde_json::Value),

    /// A received envelope failed to unescape or parse. Only that
    /// envelope is dropped; its siblings in the frame are processed.
    #[error("failed to decode server reply: {0}")]
    DecodeError(String),

    /// Reconnection attempts are exhausted (or reconnect is disabled,
    /// or the client was explicitly disconnected). All pending
    /// requests are rejected with this error and new dispatches fail
    /// with it immediately.
    #[error("connection closed and reconnect attempts exhausted")]
    ConnectionExhausted,

    /// The outbound queue reached its configured bound. Raised
    /// synchronously from dispatch; nothing is enqueued.
    #[error("outbound queue is full ({0} messages)")]
    QueueFull(usize),

    /// Invalid client configuration or API misuse.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for zephyr-link operations.
pub type Result<T> = std::result::Result<T, ZephyrLinkError>;
