//! Rust client SDK for ZephyrDB, a real-time database reached over a
//! single persistent WebSocket.
//!
//! Every operation is multiplexed onto one connection: requests are
//! serialized into `{c, id, a}` envelopes, escaped, batched on a
//! fixed flush tick and correlated back to their callers by id when
//! replies arrive. Repeating operations (`get`, `on`, `watch`,
//! `size`, `sort`) return a [`Subscription`] that keeps receiving
//! replies; everything else resolves once. Transport loss is healed
//! by a bounded reconnector: queued requests survive the gap,
//! already-sent unanswered ones are not re-sent, and once retries
//! are exhausted all pending requests are rejected with
//! [`ZephyrLinkError::ConnectionExhausted`].
//!
//! # Example
//!
//! ```rust,no_run
//! use zephyr_link::ZephyrClient;
//!
//! # async fn example() -> zephyr_link::Result<()> {
//! let client = ZephyrClient::builder()
//!     .project_id("my-project")
//!     .connect()
//!     .await?;
//!
//! client.login("alice@example.com", "secret").await?;
//! client.create("rooms/lobby", serde_json::json!({ "topic": "hello" }), true).await?;
//!
//! let mut changes = client.watch("update", "rooms/lobby").await?;
//! while let Some(change) = changes.next().await {
//!     println!("lobby changed: {}", change?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
mod correlation;
pub mod error;
pub mod event_handlers;
pub mod frame;
pub mod keypath;
pub mod protocol;
pub mod subscription;
pub mod transport;

pub use client::{ZephyrClient, ZephyrClientBuilder};
pub use config::ClientConfig;
pub use connection::{ConnectionState, ReadyState};
pub use error::{Result, ZephyrLinkError};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use keypath::KeyPath;
pub use protocol::{Envelope, RequestId, ServerReply, SortPage, SortSplit};
pub use subscription::Subscription;
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
