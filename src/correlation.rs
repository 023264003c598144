//! Correlation table mapping request ids to pending-response handles.
//!
//! Exclusively owned by the connection task; the dispatch path inserts
//! entries and the reply demultiplexer settles them, both on the same
//! task, so no locking is involved.

use crate::error::{Result, ZephyrLinkError};
use crate::protocol::RequestId;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Outcome of one server reply: the result payload, or the
/// server-supplied error wrapped in `ServerRejected`.
pub(crate) type ReplyResult = Result<Value>;

/// A registered pending response.
pub(crate) enum PendingHandle {
    /// Settled and removed by the first matching reply.
    OneShot(oneshot::Sender<ReplyResult>),
    /// Survives across replies until explicitly removed. The first
    /// reply additionally settles the `first` sender; every reply
    /// (including the first) flows into `events`.
    Persistent {
        first: Option<oneshot::Sender<ReplyResult>>,
        events: mpsc::Sender<ReplyResult>,
    },
}

/// Map from request id to its pending handle.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<RequestId, PendingHandle>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a handle under a freshly allocated id. Ids are never
    /// reused while present, so this cannot displace a live entry.
    pub(crate) fn insert(&mut self, id: RequestId, handle: PendingHandle) {
        debug_assert!(!self.entries.contains_key(&id), "request id {id} reused");
        self.entries.insert(id, handle);
    }

    /// Remove an entry, returning whether it existed.
    pub(crate) fn remove(&mut self, id: RequestId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Deliver one reply to the matching handle.
    ///
    /// Replies for unknown ids are dropped silently: a late reply for
    /// a since-removed one-shot is not an error condition.
    pub(crate) async fn settle(&mut self, id: RequestId, success: bool, payload: Value) {
        let outcome = |payload: &Value| -> ReplyResult {
            if success {
                Ok(payload.clone())
            } else {
                Err(ZephyrLinkError::ServerRejected(payload.clone()))
            }
        };

        match self.entries.get_mut(&id) {
            None => log::debug!("dropping reply for unknown request id {id}"),
            Some(PendingHandle::OneShot(_)) => {
                if let Some(PendingHandle::OneShot(tx)) = self.entries.remove(&id) {
                    if tx.send(outcome(&payload)).is_err() {
                        log::debug!("request {id} settled after its caller went away");
                    }
                }
            }
            Some(PendingHandle::Persistent { first, events }) => {
                if let Some(tx) = first.take() {
                    let _ = tx.send(outcome(&payload));
                }
                let events = events.clone();
                if events.send(outcome(&payload)).await.is_err() {
                    log::debug!("subscription {id} receiver dropped, removing entry");
                    self.entries.remove(&id);
                }
            }
        }
    }

    /// Reject every pending entry with `ConnectionExhausted` and
    /// clear the table. Used at terminal teardown.
    pub(crate) fn reject_all(&mut self) {
        for (_id, handle) in self.entries.drain() {
            match handle {
                PendingHandle::OneShot(tx) => {
                    let _ = tx.send(Err(ZephyrLinkError::ConnectionExhausted));
                }
                PendingHandle::Persistent { first, events } => {
                    if let Some(tx) = first {
                        let _ = tx.send(Err(ZephyrLinkError::ConnectionExhausted));
                    }
                    let _ = events.try_send(Err(ZephyrLinkError::ConnectionExhausted));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one_shot() -> (PendingHandle, oneshot::Receiver<ReplyResult>) {
        let (tx, rx) = oneshot::channel();
        (PendingHandle::OneShot(tx), rx)
    }

    fn persistent() -> (
        PendingHandle,
        oneshot::Receiver<ReplyResult>,
        mpsc::Receiver<ReplyResult>,
    ) {
        let (first_tx, first_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::channel(8);
        (
            PendingHandle::Persistent {
                first: Some(first_tx),
                events: event_tx,
            },
            first_rx,
            event_rx,
        )
    }

    #[tokio::test]
    async fn test_one_shot_success_removes_entry() {
        let mut table = CorrelationTable::new();
        let (handle, rx) = one_shot();
        table.insert(RequestId::new(1), handle);

        table.settle(RequestId::new(1), true, json!({"ok": 1})).await;

        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": 1}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_one_shot_failure_removes_entry() {
        let mut table = CorrelationTable::new();
        let (handle, rx) = one_shot();
        table.insert(RequestId::new(2), handle);

        table.settle(RequestId::new(2), false, json!("not found")).await;

        match rx.await.unwrap() {
            Err(ZephyrLinkError::ServerRejected(payload)) => {
                assert_eq!(payload, json!("not found"));
            }
            other => panic!("expected ServerRejected, got {other:?}"),
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_persistent_survives_replies() {
        let mut table = CorrelationTable::new();
        let (handle, first_rx, mut event_rx) = persistent();
        table.insert(RequestId::new(3), handle);

        table.settle(RequestId::new(3), true, json!(1)).await;
        table.settle(RequestId::new(3), true, json!(2)).await;

        assert_eq!(first_rx.await.unwrap().unwrap(), json!(1));
        assert_eq!(event_rx.recv().await.unwrap().unwrap(), json!(1));
        assert_eq!(event_rx.recv().await.unwrap().unwrap(), json!(2));
        assert_eq!(table.len(), 1);

        assert!(table.remove(RequestId::new(3)));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_persistent_dropped_receiver_removes_entry() {
        let mut table = CorrelationTable::new();
        let (handle, _first_rx, event_rx) = persistent();
        table.insert(RequestId::new(4), handle);
        drop(event_rx);

        table.settle(RequestId::new(4), true, json!(1)).await;

        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped_silently() {
        let mut table = CorrelationTable::new();
        table.settle(RequestId::new(99), true, json!(null)).await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_reject_all() {
        let mut table = CorrelationTable::new();
        let (one, one_rx) = one_shot();
        let (per, first_rx, mut event_rx) = persistent();
        table.insert(RequestId::new(5), one);
        table.insert(RequestId::new(6), per);

        table.reject_all();

        assert!(matches!(
            one_rx.await.unwrap(),
            Err(ZephyrLinkError::ConnectionExhausted)
        ));
        assert!(matches!(
            first_rx.await.unwrap(),
            Err(ZephyrLinkError::ConnectionExhausted)
        ));
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            Err(ZephyrLinkError::ConnectionExhausted)
        ));
        assert!(table.is_empty());
    }
}
