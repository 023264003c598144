//! Main ZephyrDB client with builder pattern.
//!
//! Every public operation funnels through the dispatch primitive
//! ([`call`](ZephyrClient::call) / [`subscribe`](ZephyrClient::subscribe));
//! the typed methods below only shape arguments into a command name
//! and payload.

use crate::config::ClientConfig;
use crate::connection::{
    connection_task, Cmd, ConnectionShared, ConnectionState, DispatchMode, CMD_CHANNEL_CAPACITY,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::{Result, ZephyrLinkError};
use crate::event_handlers::{DisconnectReason, EventHandlers};
use crate::keypath::KeyPath;
use crate::protocol::{self, SortPage, SortSplit};
use crate::subscription::Subscription;
use crate::transport::{Connector, WsConnector};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Main ZephyrDB client.
///
/// Use [`ZephyrClient::builder`] to construct instances with custom
/// configuration, or [`ZephyrClient::from_legacy_args`] for the
/// positional calling form of older integrations.
///
/// # Examples
///
/// ```rust,no_run
/// use zephyr_link::ZephyrClient;
///
/// # async fn example() -> zephyr_link::Result<()> {
/// let client = ZephyrClient::builder()
///     .project_id("my-project")
///     .connect()
///     .await?;
///
/// client.create("users/alice", serde_json::json!({ "age": 30 }), true).await?;
/// let age = client.get("users/alice/age", 99).await?.first().await?;
/// println!("age: {age}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ZephyrClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    cmd_tx: mpsc::Sender<Cmd>,
    shared: Arc<ConnectionShared>,
    _task: JoinHandle<()>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // Best-effort shutdown signal; the closed command channel
        // stops the task either way.
        let _ = self.cmd_tx.try_send(Cmd::Disconnect);
    }
}

impl ZephyrClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> ZephyrClientBuilder {
        ZephyrClientBuilder::new()
    }

    /// Connect from an explicit [`ClientConfig`].
    pub async fn from_config(config: ClientConfig, handlers: EventHandlers) -> Result<Self> {
        if config.project_id.is_empty() {
            return Err(ZephyrLinkError::ConfigurationError(
                "project_id is required".to_string(),
            ));
        }
        Self::spawn(config, Box::new(WsConnector), handlers).await
    }

    /// Connect using the positional argument form of older
    /// integrations: `(project_id, on_connect, on_close, secure,
    /// host)`. All other options keep their defaults.
    pub async fn from_legacy_args(
        project_id: &str,
        on_connect: impl Fn() + Send + Sync + 'static,
        on_close: impl Fn(DisconnectReason) + Send + Sync + 'static,
        secure: bool,
        host: &str,
    ) -> Result<Self> {
        Self::builder()
            .project_id(project_id)
            .secure(secure)
            .host(host)
            .event_handlers(
                EventHandlers::new()
                    .on_connect(on_connect)
                    .on_disconnect(on_close),
            )
            .connect()
            .await
    }

    async fn spawn(
        config: ClientConfig,
        connector: Box<dyn Connector>,
        handlers: EventHandlers,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let shared = Arc::new(ConnectionShared::new());
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(connection_task(
            cmd_rx,
            connector,
            config,
            handlers,
            shared.clone(),
            ready_tx,
        ));

        // Wait for the initial connection attempt to finish. On
        // failure the task keeps running and the reconnector takes
        // over, so the handle is returned either way.
        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("initial connection failed: {e}"),
            Err(_) => log::warn!("connection task exited before signalling readiness"),
        }

        Ok(Self {
            inner: Arc::new(ClientInner {
                cmd_tx,
                shared,
                _task: task,
            }),
        })
    }

    fn task_gone() -> ZephyrLinkError {
        ZephyrLinkError::TransportError("connection task is not running".to_string())
    }

    async fn send_cmd(&self, cmd: Cmd) -> Result<()> {
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Self::task_gone())
    }

    /// Dispatch a one-shot command and await its reply.
    ///
    /// This is the raw primitive behind the typed one-shot methods;
    /// it allocates a request id, registers a pending handle,
    /// enqueues the escaped envelope and resolves with the server's
    /// reply. Repeating commands are refused; use
    /// [`subscribe`](ZephyrClient::subscribe) for those.
    pub async fn call(&self, command: &str, args: Value) -> Result<Value> {
        if protocol::is_repeating(command) {
            return Err(ZephyrLinkError::ConfigurationError(format!(
                "`{command}` repeats; use subscribe() or the typed subscription methods"
            )));
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_cmd(Cmd::Dispatch {
            command: command.to_owned(),
            args,
            mode: DispatchMode::OneShot { reply_tx },
            ack_tx,
        })
        .await?;
        ack_rx.await.map_err(|_| Self::task_gone())??;
        reply_rx.await.map_err(|_| Self::task_gone())?
    }

    /// Dispatch a repeating command and return its [`Subscription`].
    pub async fn subscribe(&self, command: &str, args: Value) -> Result<Subscription> {
        if !protocol::is_repeating(command) {
            return Err(ZephyrLinkError::ConfigurationError(format!(
                "`{command}` does not repeat; use call() or the typed one-shot methods"
            )));
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let (first_tx, first_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.send_cmd(Cmd::Dispatch {
            command: command.to_owned(),
            args,
            mode: DispatchMode::Persistent { first_tx, event_tx },
            ack_tx,
        })
        .await?;
        let id = ack_rx.await.map_err(|_| Self::task_gone())??;
        Ok(Subscription::new(
            id,
            first_rx,
            event_rx,
            self.inner.cmd_tx.clone(),
        ))
    }

    // ── Authentication ──────────────────────────────────────────────

    /// Request a password-reset email.
    pub async fn forgot_password(&self, email: &str) -> Result<Value> {
        self.call("forgot_password", json!({ "email": email })).await
    }

    /// Change a password. `uid` may be empty to target the current user.
    pub async fn edit_password(&self, password: &str, uid: &str) -> Result<Value> {
        self.call("edit_password", json!({ "password": password, "uid": uid }))
            .await
    }

    /// Authenticate this connection (wire command `connect`).
    pub async fn login(&self, email: &str, password: &str) -> Result<Value> {
        self.call("connect", json!({ "email": email, "password": password }))
            .await
    }

    /// Register a new account.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        username: &str,
        full_name: &str,
    ) -> Result<Value> {
        self.call(
            "register",
            json!({
                "email": email,
                "username": username,
                "full_name": full_name,
                "password": password,
            }),
        )
        .await
    }

    // ── Database operations ─────────────────────────────────────────

    /// Create a value at `key_path`. `w` asks the server to confirm
    /// the write before replying.
    pub async fn create(
        &self,
        key_path: impl Into<KeyPath>,
        value: Value,
        w: bool,
    ) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("create", json!({ "keyPath": key_path, "value": value, "w": w }))
            .await
    }

    /// Append a value to the list at `key_path`.
    pub async fn append(&self, key_path: impl Into<KeyPath>, value: Value) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("append", json!({ "keyPath": key_path, "value": value }))
            .await
    }

    /// Whether a value exists at `key_path`.
    pub async fn exist(&self, key_path: impl Into<KeyPath>) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("exist", json!({ "keyPath": key_path })).await
    }

    /// Update the value at `key_path`. `w` asks the server to confirm
    /// the write before replying.
    pub async fn update(
        &self,
        key_path: impl Into<KeyPath>,
        value: Value,
        w: bool,
    ) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("update", json!({ "keyPath": key_path, "value": value, "w": w }))
            .await
    }

    /// Delete the value at `key_path`.
    pub async fn delete(&self, key_path: impl Into<KeyPath>) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("delete", json!({ "keyPath": key_path })).await
    }

    /// List child keys under `key_path`. `filter` is a server-side
    /// selector, `all` by default.
    pub async fn keys(&self, key_path: impl Into<KeyPath>, filter: &str) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("keys", json!({ "keyPath": key_path, "filter": filter }))
            .await
    }

    /// Invoke a server-side function stored at `key_path`.
    pub async fn run(&self, key_path: impl Into<KeyPath>, args: Value) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("run", json!({ "keyPath": key_path, "args": args }))
            .await
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Read the value at `key_path` down to `depth` levels. Repeating:
    /// the server may push the value again; consume via the returned
    /// [`Subscription`].
    pub async fn get(&self, key_path: impl Into<KeyPath>, depth: u32) -> Result<Subscription> {
        let key_path: KeyPath = key_path.into();
        self.subscribe("get", json!({ "keyPath": key_path, "depth": depth }))
            .await
    }

    /// Subscribe to `command` events (e.g. `update`) at `key_path`.
    pub async fn on(&self, command: &str, key_path: impl Into<KeyPath>) -> Result<Subscription> {
        let key_path: KeyPath = key_path.into();
        self.subscribe("on", json!({ "keyPath": key_path, "command": command }))
            .await
    }

    /// Watch `command` events for the whole subtree at `key_path`.
    pub async fn watch(&self, command: &str, key_path: impl Into<KeyPath>) -> Result<Subscription> {
        let key_path: KeyPath = key_path.into();
        self.subscribe("watch", json!({ "keyPath": key_path, "command": command }))
            .await
    }

    /// Number of children at `key_path`, pushed on change.
    pub async fn size(&self, key_path: impl Into<KeyPath>) -> Result<Subscription> {
        let key_path: KeyPath = key_path.into();
        self.subscribe("size", json!({ "keyPath": key_path })).await
    }

    /// Sorted listing of the children at `key_path`.
    pub async fn sort(
        &self,
        key_path: impl Into<KeyPath>,
        split: SortSplit,
        page: SortPage,
        order: &str,
    ) -> Result<Subscription> {
        let key_path: KeyPath = key_path.into();
        self.subscribe(
            "sort",
            json!({ "keyPath": key_path, "split": split, "result": page, "order": order }),
        )
        .await
    }

    /// Tell the server to stop emitting `event` replies for the
    /// `command` subscription at `key_path`. The local handle is
    /// released separately via [`Subscription::close`] or drop.
    pub async fn stop(
        &self,
        event: &str,
        command: &str,
        key_path: impl Into<KeyPath>,
    ) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call(
            "stop",
            json!({ "event": event, "command": command, "keyPath": key_path }),
        )
        .await
    }

    // ── Presence ────────────────────────────────────────────────────

    /// Send a presence ping to watchers of `key_path`.
    pub async fn ping(
        &self,
        key_path: impl Into<KeyPath>,
        data: Value,
        uid: &str,
    ) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("ping", json!({ "keyPath": key_path, "data": data, "uid": uid }))
            .await
    }

    /// Answer a presence ping.
    pub async fn pong(
        &self,
        key_path: impl Into<KeyPath>,
        data: Value,
        uid: &str,
    ) -> Result<Value> {
        let key_path: KeyPath = key_path.into();
        self.call("pong", json!({ "keyPath": key_path, "data": data, "uid": uid }))
            .await
    }

    // ── Groups ──────────────────────────────────────────────────────

    /// Join the group `gid`.
    pub async fn join(&self, gid: &str) -> Result<Value> {
        self.call("join", json!({ "gid": gid })).await
    }

    /// Invite `uid` into group `gid` with `role`.
    pub async fn invite(&self, gid: &str, uid: &str, role: &str) -> Result<Value> {
        self.call("invite", json!({ "gid": gid, "uid": uid, "role": role }))
            .await
    }

    /// Leave the group `gid`.
    pub async fn leave(&self, gid: &str) -> Result<Value> {
        self.call("leave", json!({ "gid": gid })).await
    }

    // ── Misc ────────────────────────────────────────────────────────

    /// Resolve a custom domain through the server.
    pub async fn dns_resolve(&self, domain_name: &str) -> Result<Value> {
        self.call("dns_resolve", json!({ "domain_name": domain_name }))
            .await
    }

    // ── Connection management ───────────────────────────────────────

    /// Close the connection. Terminal: the reconnector is not
    /// invoked and pending requests are rejected.
    pub async fn disconnect(&self) {
        let _ = self.inner.cmd_tx.send(Cmd::Disconnect).await;
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.shared.snapshot().is_connected
    }

    /// Side-effect-free snapshot of the connection status.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.snapshot()
    }

    /// Count of requests awaiting replies (one-shot and persistent).
    pub async fn pending_requests(&self) -> usize {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .inner
            .cmd_tx
            .send(Cmd::PendingRequests { result_tx })
            .await
            .is_err()
        {
            return 0;
        }
        result_rx.await.unwrap_or(0)
    }
}

/// Builder for configuring [`ZephyrClient`] instances.
pub struct ZephyrClientBuilder {
    project_id: Option<String>,
    secure: bool,
    host: String,
    port: u16,
    reconnect: bool,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
    flush_interval: Duration,
    max_queue_len: usize,
    handlers: EventHandlers,
    connector: Option<Box<dyn Connector>>,
}

impl ZephyrClientBuilder {
    fn new() -> Self {
        let defaults = ClientConfig::new("");
        Self {
            project_id: None,
            secure: defaults.secure,
            host: defaults.host,
            port: defaults.port,
            reconnect: defaults.reconnect,
            reconnect_delay: defaults.reconnect_delay,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            flush_interval: defaults.flush_interval,
            max_queue_len: defaults.max_queue_len,
            handlers: EventHandlers::new(),
            connector: None,
        }
    }

    /// Set the project identifier (required).
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Use `wss` (true, default) or `ws`.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the server hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable automatic reconnection.
    pub fn reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the fixed delay between reconnection attempts.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the maximum number of reconnection attempts.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the flush tick interval for outbound batching.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the outbound queue bound.
    pub fn max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Register connection lifecycle event handlers.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Substitute the transport connector. Mostly useful for tests;
    /// defaults to the WebSocket connector.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Spawn the connection task and attempt the initial connection.
    pub async fn connect(self) -> Result<ZephyrClient> {
        let project_id = self.project_id.ok_or_else(|| {
            ZephyrLinkError::ConfigurationError("project_id is required".to_string())
        })?;
        let config = ClientConfig {
            project_id,
            secure: self.secure,
            host: self.host,
            port: self.port,
            reconnect: self.reconnect,
            reconnect_delay: self.reconnect_delay,
            max_reconnect_attempts: self.max_reconnect_attempts,
            flush_interval: self.flush_interval,
            max_queue_len: self.max_queue_len,
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Box::new(WsConnector));
        ZephyrClient::spawn(config, connector, self.handlers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_missing_project_id() {
        let result = ZephyrClient::builder().connect().await;
        assert!(matches!(
            result,
            Err(ZephyrLinkError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_from_config_missing_project_id() {
        let result =
            ZephyrClient::from_config(ClientConfig::new(""), EventHandlers::new()).await;
        assert!(matches!(
            result,
            Err(ZephyrLinkError::ConfigurationError(_))
        ));
    }
}
