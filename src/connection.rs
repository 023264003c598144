//! Background connection task: state machine, outbound queue, flush
//! scheduler, reply demultiplexer and reconnector.
//!
//! The task exclusively owns the transport handle, the correlation
//! table, the outbound queue and the request-id counter. All
//! mutations are serialized by its event loop, so none of that state
//! needs locking; the public client talks to it over a command
//! channel and reads connection status from shared atomics.
//!
//! Lifecycle: `Connecting -> Open -> Closed(unexpected) ->
//! Connecting (retry)` up to the configured attempt limit, or
//! `Closed (terminal)` on explicit disconnect, disabled reconnect,
//! or retry exhaustion. At terminal close every pending correlation
//! entry is rejected with `ConnectionExhausted` and later dispatches
//! fail with the same error.

use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, PendingHandle, ReplyResult};
use crate::error::{Result, ZephyrLinkError};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::frame;
use crate::protocol::{Envelope, RequestId, ServerReply};
use crate::transport::{Connector, Transport, TransportEvent};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant as TokioInstant;

/// Capacity of the command channel from client handles to the task.
pub(crate) const CMD_CHANNEL_CAPACITY: usize = 256;

/// Capacity of per-subscription event channels.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Transport readiness, mirroring WebSocket ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// A connection attempt is in progress (or scheduled).
    Connecting,
    /// The connection is open and frames flow.
    Open,
    /// An explicit disconnect is underway.
    Closing,
    /// No connection, and none will be attempted.
    Closed,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Side-effect-free snapshot of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Whether the transport is currently open.
    pub is_connected: bool,
    /// Transport readiness.
    pub ready_state: ReadyState,
    /// Reconnection attempts since the last successful open.
    pub reconnect_attempts: u32,
}

/// Connection status shared between the task and client handles.
pub(crate) struct ConnectionShared {
    pub(crate) connected: AtomicBool,
    ready_state: AtomicU8,
    pub(crate) reconnect_attempts: AtomicU32,
}

impl ConnectionShared {
    pub(crate) fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            ready_state: AtomicU8::new(ReadyState::Connecting as u8),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    fn set_ready(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            is_connected: self.connected.load(Ordering::SeqCst),
            ready_state: ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst)),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
        }
    }
}

/// How a dispatched request wants its replies delivered.
pub(crate) enum DispatchMode {
    OneShot {
        reply_tx: oneshot::Sender<ReplyResult>,
    },
    Persistent {
        first_tx: oneshot::Sender<ReplyResult>,
        event_tx: mpsc::Sender<ReplyResult>,
    },
}

/// Commands from client handles to the connection task.
pub(crate) enum Cmd {
    /// Serialize, escape, register and enqueue one request.
    Dispatch {
        command: String,
        args: Value,
        mode: DispatchMode,
        ack_tx: oneshot::Sender<Result<RequestId>>,
    },
    /// Drop the correlation entry for `id`. Stale removals (already
    /// gone) are harmless.
    RemoveHandle { id: RequestId },
    /// Count of live correlation entries.
    PendingRequests { result_tx: oneshot::Sender<usize> },
    /// Explicit user-initiated close. Terminal; no reconnect.
    Disconnect,
}

/// Validate, register and enqueue one request. Synchronous failures
/// (`QueueFull`, `MalformedPayload`) are reported through `ack_tx`
/// and leave no trace in the table or queue.
fn handle_dispatch(
    table: &mut CorrelationTable,
    queue: &mut VecDeque<String>,
    next_id: &mut u64,
    max_queue_len: usize,
    command: String,
    args: Value,
    mode: DispatchMode,
    ack_tx: oneshot::Sender<Result<RequestId>>,
) {
    if queue.len() >= max_queue_len {
        let _ = ack_tx.send(Err(ZephyrLinkError::QueueFull(max_queue_len)));
        return;
    }

    *next_id += 1;
    let id = RequestId::new(*next_id);
    let envelope = Envelope { command, id, args };

    let serialized = match serde_json::to_string(&envelope) {
        Ok(s) => s,
        Err(e) => {
            let _ = ack_tx.send(Err(ZephyrLinkError::MalformedPayload(e.to_string())));
            return;
        }
    };

    let escaped = frame::escape(&serialized);
    if frame::contains_unescaped_delimiter(&escaped) {
        // Fail closed rather than send a batch that splits wrong.
        let _ = ack_tx.send(Err(ZephyrLinkError::MalformedPayload(
            "delimiter survived escaping".to_string(),
        )));
        return;
    }

    let handle = match mode {
        DispatchMode::OneShot { reply_tx } => PendingHandle::OneShot(reply_tx),
        DispatchMode::Persistent { first_tx, event_tx } => PendingHandle::Persistent {
            first: Some(first_tx),
            events: event_tx,
        },
    };
    table.insert(id, handle);
    queue.push_back(escaped);
    let _ = ack_tx.send(Ok(id));
}

/// Split one received frame into envelopes and settle each against
/// the table, in batch order. A malformed envelope is logged and
/// skipped without aborting its siblings.
async fn demux_frame(frame_text: &str, table: &mut CorrelationTable) {
    for part in frame::split_batch(frame_text) {
        let decoded = frame::unescape(part).and_then(|raw| {
            serde_json::from_str::<ServerReply>(&raw)
                .map_err(|e| ZephyrLinkError::DecodeError(e.to_string()))
        });
        match decoded {
            Ok(reply) => table.settle(reply.id, reply.success, reply.result).await,
            Err(e) => log::warn!("skipping malformed envelope in batch: {e}"),
        }
    }
}

/// Terminal state: reject everything pending, then keep answering
/// commands with `ConnectionExhausted` until all client handles are
/// gone.
async fn terminal_drain(
    cmd_rx: &mut mpsc::Receiver<Cmd>,
    table: &mut CorrelationTable,
    queue: &mut VecDeque<String>,
    shared: &ConnectionShared,
) {
    shared.connected.store(false, Ordering::SeqCst);
    shared.set_ready(ReadyState::Closed);
    if !table.is_empty() {
        log::info!("rejecting {} pending request(s)", table.len());
    }
    table.reject_all();
    queue.clear();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Cmd::Dispatch { ack_tx, .. } => {
                let _ = ack_tx.send(Err(ZephyrLinkError::ConnectionExhausted));
            }
            Cmd::PendingRequests { result_tx } => {
                let _ = result_tx.send(0);
            }
            Cmd::RemoveHandle { .. } | Cmd::Disconnect => {}
        }
    }
}

/// The main background task owning the connection.
pub(crate) async fn connection_task(
    mut cmd_rx: mpsc::Receiver<Cmd>,
    connector: Box<dyn Connector>,
    config: ClientConfig,
    handlers: EventHandlers,
    shared: std::sync::Arc<ConnectionShared>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let url = config.endpoint_url();
    let mut table = CorrelationTable::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut next_id: u64 = 0;
    let mut transport: Option<Box<dyn Transport>> = None;
    let mut next_flush = TokioInstant::now() + config.flush_interval;

    // Initial connection attempt. A failure is left to the
    // reconnector; the caller learns the outcome via `ready_tx`.
    shared.set_ready(ReadyState::Connecting);
    match connector.connect(&url).await {
        Ok(conn) => {
            shared.connected.store(true, Ordering::SeqCst);
            shared.set_ready(ReadyState::Open);
            handlers.emit_connect();
            next_flush = TokioInstant::now() + config.flush_interval;
            transport = Some(conn);
            let _ = ready_tx.send(Ok(()));
        }
        Err(e) => {
            log::warn!("initial connection to {url} failed: {e}");
            handlers.emit_error(ConnectionError::new(e.to_string(), config.reconnect));
            let _ = ready_tx.send(Err(e));
        }
    }

    loop {
        if let Some(conn) = transport.as_mut() {
            let flush_sleep = tokio::time::sleep_until(next_flush);
            tokio::pin!(flush_sleep);

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Dispatch { command, args, mode, ack_tx }) => {
                        handle_dispatch(
                            &mut table, &mut queue, &mut next_id,
                            config.max_queue_len, command, args, mode, ack_tx,
                        );
                    }
                    Some(Cmd::RemoveHandle { id }) => {
                        if table.remove(id) {
                            log::debug!("removed handle for request {id}");
                        }
                    }
                    Some(Cmd::PendingRequests { result_tx }) => {
                        let _ = result_tx.send(table.len());
                    }
                    Some(Cmd::Disconnect) => {
                        shared.set_ready(ReadyState::Closing);
                        conn.close().await;
                        let was_connected = shared.connected.swap(false, Ordering::SeqCst);
                        if was_connected {
                            handlers.emit_disconnect(DisconnectReason::new("client disconnected"));
                        }
                        terminal_drain(&mut cmd_rx, &mut table, &mut queue, &shared).await;
                        return;
                    }
                    None => {
                        conn.close().await;
                        shared.connected.store(false, Ordering::SeqCst);
                        shared.set_ready(ReadyState::Closed);
                        return;
                    }
                },

                _ = &mut flush_sleep => {
                    next_flush = TokioInstant::now() + config.flush_interval;
                    if !queue.is_empty() {
                        let envelopes: Vec<String> = queue.drain(..).collect();
                        let batch = frame::join_batch(&envelopes);
                        handlers.emit_send(&batch);
                        if let Err(e) = conn.send(&batch).await {
                            // Drained messages are lost: at-most-once
                            // per queued message across a disconnect.
                            log::warn!("failed to send batch of {} message(s): {e}", envelopes.len());
                            handlers.emit_error(ConnectionError::new(e.to_string(), config.reconnect));
                            shared.connected.store(false, Ordering::SeqCst);
                            shared.set_ready(ReadyState::Closed);
                            handlers.emit_disconnect(DisconnectReason::new(format!("send failed: {e}")));
                            transport = None;
                            continue;
                        }
                    }
                },

                event = conn.next_event() => match event {
                    TransportEvent::Message(text) => {
                        handlers.emit_receive(&text);
                        demux_frame(&text, &mut table).await;
                    }
                    TransportEvent::Closed(reason) => {
                        shared.connected.store(false, Ordering::SeqCst);
                        shared.set_ready(ReadyState::Closed);
                        handlers.emit_disconnect(reason);
                        transport = None;
                        continue;
                    }
                    TransportEvent::Error(message) => {
                        log::warn!("transport error: {message}");
                        handlers.emit_error(ConnectionError::new(&message, config.reconnect));
                        shared.connected.store(false, Ordering::SeqCst);
                        shared.set_ready(ReadyState::Closed);
                        handlers.emit_disconnect(
                            DisconnectReason::new(format!("transport error: {message}")),
                        );
                        transport = None;
                        continue;
                    }
                },
            }
        } else {
            // Disconnected: evaluate the reconnect policy.
            if !config.reconnect
                || shared.reconnect_attempts.load(Ordering::SeqCst) >= config.max_reconnect_attempts
            {
                if config.reconnect {
                    log::warn!(
                        "max reconnection attempts ({}) reached",
                        config.max_reconnect_attempts
                    );
                    handlers.emit_error(ConnectionError::new(
                        format!(
                            "max reconnection attempts ({}) reached",
                            config.max_reconnect_attempts
                        ),
                        false,
                    ));
                }
                terminal_drain(&mut cmd_rx, &mut table, &mut queue, &shared).await;
                return;
            }

            let attempt = shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            shared.set_ready(ReadyState::Connecting);
            log::info!(
                "attempting to reconnect in {:?} ({}/{})",
                config.reconnect_delay,
                attempt,
                config.max_reconnect_attempts
            );

            // Wait out the backoff delay while still serving
            // commands; dispatches keep queueing in the meantime.
            let sleep_fut = tokio::time::sleep(config.reconnect_delay);
            tokio::pin!(sleep_fut);
            loop {
                tokio::select! {
                    biased;

                    cmd = cmd_rx.recv() => match cmd {
                        Some(Cmd::Dispatch { command, args, mode, ack_tx }) => {
                            handle_dispatch(
                                &mut table, &mut queue, &mut next_id,
                                config.max_queue_len, command, args, mode, ack_tx,
                            );
                        }
                        Some(Cmd::RemoveHandle { id }) => {
                            table.remove(id);
                        }
                        Some(Cmd::PendingRequests { result_tx }) => {
                            let _ = result_tx.send(table.len());
                        }
                        Some(Cmd::Disconnect) => {
                            terminal_drain(&mut cmd_rx, &mut table, &mut queue, &shared).await;
                            return;
                        }
                        None => return,
                    },

                    _ = &mut sleep_fut => break,
                }
            }

            match connector.connect(&url).await {
                Ok(conn) => {
                    log::info!("reconnection successful");
                    shared.reconnect_attempts.store(0, Ordering::SeqCst);
                    shared.connected.store(true, Ordering::SeqCst);
                    shared.set_ready(ReadyState::Open);
                    handlers.emit_connect();
                    // Restart the flush schedule for the new
                    // connection; queued messages go out on its
                    // first tick. In-flight requests from the old
                    // connection are not re-sent.
                    next_flush = TokioInstant::now() + config.flush_interval;
                    transport = Some(conn);
                }
                Err(e) => {
                    log::warn!("reconnection attempt {attempt} failed: {e}");
                    handlers.emit_error(ConnectionError::new(e.to_string(), true));
                }
            }
        }
    }
}
