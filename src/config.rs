//! Client configuration.

use std::time::Duration;

/// Configuration for a [`ZephyrClient`](crate::ZephyrClient) instance.
///
/// Construct via [`ClientConfig::new`] and adjust fields, or use the
/// client builder which exposes the same knobs fluently.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project identifier; becomes the leftmost DNS label of the
    /// endpoint (`{ws|wss}://{project_id}.{host}:{port}`).
    pub project_id: String,

    /// Use `wss` instead of `ws`.
    /// Default: true
    pub secure: bool,

    /// Server hostname.
    /// Default: `db.zephyrdb.com`
    pub host: String,

    /// Server port.
    /// Default: 42600
    pub port: u16,

    /// Reconnect automatically after an unexpected close.
    /// Default: true
    pub reconnect: bool,

    /// Fixed delay between reconnection attempts.
    /// Default: 1 second
    pub reconnect_delay: Duration,

    /// Maximum number of reconnection attempts before the client
    /// gives up and rejects all pending requests.
    /// Default: 5
    pub max_reconnect_attempts: u32,

    /// Interval of the flush tick that batches queued messages into
    /// one transport frame.
    /// Default: 100 milliseconds
    pub flush_interval: Duration,

    /// Bound on the outbound queue; dispatches past it fail with
    /// [`QueueFull`](crate::ZephyrLinkError::QueueFull).
    /// Default: 1024
    pub max_queue_len: usize,
}

impl ClientConfig {
    /// Configuration with default options for `project_id`.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            secure: true,
            host: "db.zephyrdb.com".to_string(),
            port: 42600,
            reconnect: true,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_attempts: 5,
            flush_interval: Duration::from_millis(100),
            max_queue_len: 1024,
        }
    }

    /// The WebSocket endpoint URL this configuration points at.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}.{}:{}", scheme, self.project_id, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("demo");
        assert!(config.secure);
        assert_eq!(config.host, "db.zephyrdb.com");
        assert_eq!(config.port, 42600);
        assert!(config.reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.max_queue_len, 1024);
    }

    #[test]
    fn test_endpoint_url() {
        let mut config = ClientConfig::new("demo");
        assert_eq!(config.endpoint_url(), "wss://demo.db.zephyrdb.com:42600");

        config.secure = false;
        config.host = "localhost".to_string();
        config.port = 9000;
        assert_eq!(config.endpoint_url(), "ws://demo.localhost:9000");
    }
}
