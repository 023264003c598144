//! Consumer handle for repeating operations.

use crate::connection::Cmd;
use crate::correlation::ReplyResult;
use crate::error::{Result, ZephyrLinkError};
use crate::protocol::RequestId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Handle to a repeating operation (`get`, `on`, `watch`, `size`,
/// `sort`).
///
/// Exposes two distinct ways to consume replies: [`first`] awaits the
/// first one, [`next`] receives every reply in arrival order
/// (including the first). The correlation entry stays registered
/// until the handle is closed or dropped; replies arriving after
/// that are dropped like any late reply.
///
/// [`first`]: Subscription::first
/// [`next`]: Subscription::next
///
/// # Examples
///
/// ```rust,no_run
/// use zephyr_link::ZephyrClient;
///
/// # async fn example() -> zephyr_link::Result<()> {
/// let client = ZephyrClient::builder().project_id("demo").connect().await?;
///
/// let mut changes = client.on("update", "users/alice").await?;
/// let ack = changes.first().await?;
/// println!("subscribed: {ack}");
///
/// while let Some(change) = changes.next().await {
///     println!("changed: {}", change?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Subscription {
    id: RequestId,
    first_rx: Option<oneshot::Receiver<ReplyResult>>,
    event_rx: mpsc::Receiver<ReplyResult>,
    cmd_tx: mpsc::Sender<Cmd>,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: RequestId,
        first_rx: oneshot::Receiver<ReplyResult>,
        event_rx: mpsc::Receiver<ReplyResult>,
        cmd_tx: mpsc::Sender<Cmd>,
    ) -> Self {
        Self {
            id,
            first_rx: Some(first_rx),
            event_rx,
            cmd_tx,
            closed: false,
        }
    }

    /// The request id this subscription is registered under.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Await the first reply. May only be awaited once; later replies
    /// are consumed through [`next`](Subscription::next).
    pub async fn first(&mut self) -> Result<Value> {
        let rx = self.first_rx.take().ok_or_else(|| {
            ZephyrLinkError::ConfigurationError(
                "first() may only be awaited once per subscription".to_string(),
            )
        })?;
        rx.await
            .map_err(|_| ZephyrLinkError::TransportError("connection task is not running".to_string()))?
    }

    /// Receive the next reply. Returns `None` once the subscription
    /// is closed and all buffered replies are consumed.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        self.event_rx.recv().await
    }

    /// Remove the local correlation entry. The server keeps sending
    /// until told to stop via [`ZephyrClient::stop`](crate::ZephyrClient::stop);
    /// those replies are then dropped as late replies.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.cmd_tx.send(Cmd::RemoveHandle { id: self.id }).await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.cmd_tx.try_send(Cmd::RemoveHandle { id: self.id });
        }
    }
}
