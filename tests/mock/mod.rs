//! Channel-backed mock transport for integration tests.
//!
//! The test side holds a [`MockLink`] per established connection:
//! frames the client sends arrive on `sent_rx`, and the test injects
//! server behavior (frames, closes, errors) through `event_tx`.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use zephyr_link::{
    Connector, DisconnectReason, Result, Transport, TransportEvent, ZephyrLinkError,
};

/// Test-side handle to one established mock connection.
pub struct MockLink {
    pub sent_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl MockLink {
    /// Deliver a transport event to the client.
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Deliver one inbound batch frame.
    pub fn inject_frame(&self, frame: &str) {
        self.inject(TransportEvent::Message(frame.to_string()));
    }

    /// Simulate the server closing the connection.
    pub fn close(&self) {
        self.inject(TransportEvent::Closed(DisconnectReason::new(
            "server closed connection",
        )));
    }
}

struct MockTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: &str) -> Result<()> {
        self.sent_tx
            .send(frame.to_owned())
            .map_err(|_| ZephyrLinkError::TransportError("mock connection closed".to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.event_rx.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(DisconnectReason::new("mock link dropped")),
        }
    }

    async fn close(&mut self) {}
}

/// Scriptable connector producing [`MockTransport`]s.
///
/// Each connection attempt pops one scripted outcome (front first);
/// with the script empty, `default_accept` decides. Every accepted
/// attempt hands the test a fresh [`MockLink`] through the receiver
/// returned by [`MockConnector::new`].
#[derive(Clone)]
pub struct MockConnector {
    outcomes: Arc<Mutex<VecDeque<bool>>>,
    default_accept: bool,
    attempts: Arc<AtomicU32>,
    links_tx: mpsc::UnboundedSender<MockLink>,
}

impl MockConnector {
    pub fn new(default_accept: bool) -> (Self, mpsc::UnboundedReceiver<MockLink>) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        (
            Self {
                outcomes: Arc::new(Mutex::new(VecDeque::new())),
                default_accept,
                attempts: Arc::new(AtomicU32::new(0)),
                links_tx,
            },
            links_rx,
        )
    }

    /// Queue outcomes for the next connection attempts.
    pub fn script(&self, outcomes: &[bool]) {
        self.outcomes.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Total connection attempts observed.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let accept = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default_accept);
        if !accept {
            return Err(ZephyrLinkError::TransportError(
                "mock connection refused".to_string(),
            ));
        }
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = self.links_tx.send(MockLink { sent_rx, event_tx });
        Ok(Box::new(MockTransport { sent_tx, event_rx }))
    }
}
