//! # Async Client API
//!
//! Purpose: Expose the pipelined memcached binary protocol through a cheap,
//! cloneable handle.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides the connection task, opaque
//!    assignment and response correlation.
//! 2. **Callbacks at the Core**: `send_request` takes an optional callback;
//!    the typed async helpers are thin wrappers over it.
//! 3. **Fail Fast**: Encoding errors surface synchronously, before anything
//!    reaches the connection task.
//! 4. **No Silent Loss**: Every registered callback sees exactly one final
//!    response, real or DISCONNECTED.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use remc_common::{Command, Packet, Status, Storage, HEADER_SIZE};

use crate::config::ClientConfig;
use crate::connection::{self, Connection, Message};
use crate::error::{ClientError, ClientResult};
use crate::pending::{log_fault, Callback, FaultHook, Flow};

/// One key/value pair from a STAT exchange.
pub type StatEntry = (Bytes, Bytes);

/// Handle to a connection task.
///
/// Clones share the same connection; requests from all clones are pipelined
/// on it in submission order.
#[derive(Clone)]
pub struct Client {
    tx: UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
}

impl Client {
    /// Connects with default configuration.
    pub async fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig::builder().addr(addr).build()?;
        Self::with_config(config).await
    }

    /// Connects with a custom configuration.
    pub async fn with_config(config: ClientConfig) -> ClientResult<Self> {
        Self::with_hook(config, log_fault()).await
    }

    /// Connects and reports callback panics to `hook`.
    ///
    /// The first connect attempt must succeed; later drops are recovered
    /// by the connection task.
    pub async fn with_hook(config: ClientConfig, hook: FaultHook) -> ClientResult<Self> {
        config.validate()?;
        let stream = connection::open(&config).await?;
        tracing::info!(addr = %config.addr, "connected");

        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let task = Connection::new(config, rx, connected.clone(), hook);
        tokio::spawn(task.run(stream));
        Ok(Client { tx, connected })
    }

    /// True while a session is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Ends the connection task. Pending callbacks receive DISCONNECTED and
    /// no reconnect is attempted.
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close);
    }

    /// Sends a request, optionally registering a callback for its responses.
    ///
    /// The opaque field is assigned by the connection task. A request sent
    /// without a callback is never tracked.
    pub fn send_request(&self, packet: Packet, callback: Option<Callback>) -> ClientResult<()> {
        let body = packet.extras.encoded_len() + packet.key.len() + packet.value.len();
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + body);
        packet.encode(&mut frame)?;
        self.tx
            .send(Message::Send {
                frame,
                opcode: packet.header.opcode,
                callback,
            })
            .map_err(|_| ClientError::Shutdown)
    }

    /// Sends a typed command with a callback.
    pub fn send_command<F>(&self, command: Command, callback: F) -> ClientResult<()>
    where
        F: FnMut(&Packet) -> Flow + Send + 'static,
    {
        self.send_request(command.into_packet(), Some(Box::new(callback)))
    }

    /// Requests server statistics. `callback` sees every response: one per
    /// key/value pair, then the empty-key terminator (or an error status).
    pub fn stats<F>(&self, group: Option<&[u8]>, mut callback: F) -> ClientResult<()>
    where
        F: FnMut(&Packet) + Send + 'static,
    {
        let command = Command::stat(group.map(Bytes::copy_from_slice));
        self.send_command(command, move |packet: &Packet| {
            callback(packet);
            if packet.status().is_success() && !packet.key.is_empty() {
                Flow::Proceed
            } else {
                Flow::Done
            }
        })
    }

    /// Collects a full STAT listing.
    pub async fn stats_collect(&self, group: Option<&[u8]>) -> ClientResult<Vec<StatEntry>> {
        let (done, wait) = oneshot::channel();
        let mut done = Some(done);
        let mut entries = Vec::new();
        self.stats(group, move |packet: &Packet| {
            let outcome = match packet.status() {
                Status::NoError if !packet.key.is_empty() => {
                    entries.push((packet.key.clone(), packet.value.clone()));
                    return;
                }
                Status::NoError => Ok(std::mem::take(&mut entries)),
                status => ClientError::check(status).map(|_| Vec::new()),
            };
            if let Some(done) = done.take() {
                let _ = done.send(outcome);
            }
        })?;
        wait.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Fetches a value. `Ok(None)` when the key is missing.
    pub async fn get(&self, key: impl Into<Bytes>) -> ClientResult<Option<Bytes>> {
        let response = self.call(Command::get(key)).await?;
        match response.status() {
            Status::KeyNotFound => Ok(None),
            status => {
                ClientError::check(status)?;
                Ok(Some(response.value))
            }
        }
    }

    /// Stores a value unconditionally.
    pub async fn set(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        storage: Storage,
    ) -> ClientResult<()> {
        let response = self.call(Command::set(key, value, storage)).await?;
        ClientError::check(response.status())
    }

    /// Stores a value only if the key is absent. Returns false when it exists.
    pub async fn add(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        storage: Storage,
    ) -> ClientResult<bool> {
        let response = self.call(Command::add(key, value, storage)).await?;
        match response.status() {
            Status::KeyExists | Status::ItemNotStored => Ok(false),
            status => ClientError::check(status).map(|_| true),
        }
    }

    /// Deletes a key. Returns false when it did not exist.
    pub async fn delete(&self, key: impl Into<Bytes>) -> ClientResult<bool> {
        let response = self.call(Command::delete(key)).await?;
        match response.status() {
            Status::KeyNotFound => Ok(false),
            status => ClientError::check(status).map(|_| true),
        }
    }

    /// Round trip with no side effects.
    pub async fn noop(&self) -> ClientResult<()> {
        let response = self.call(Command::Noop).await?;
        ClientError::check(response.status())
    }

    /// SETQ without tracking; failures are not observed.
    pub fn set_quiet(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        storage: Storage,
    ) -> ClientResult<()> {
        self.send_request(Command::set(key, value, storage).quiet().into_packet(), None)
    }

    /// ADDQ without tracking; failures are not observed.
    pub fn add_quiet(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        storage: Storage,
    ) -> ClientResult<()> {
        self.send_request(Command::add(key, value, storage).quiet().into_packet(), None)
    }

    /// DELETEQ without tracking; failures are not observed.
    pub fn delete_quiet(&self, key: impl Into<Bytes>) -> ClientResult<()> {
        self.send_request(Command::delete(key).quiet().into_packet(), None)
    }

    /// GETQ. `callback` runs on a hit or on DISCONNECTED; a miss produces no
    /// response and the callback is dropped once a later response arrives.
    pub fn get_quiet<F>(&self, key: impl Into<Bytes>, callback: F) -> ClientResult<()>
    where
        F: FnOnce(&Packet) + Send + 'static,
    {
        let mut callback = Some(callback);
        self.send_command(Command::get(key).quiet(), move |packet: &Packet| {
            if let Some(callback) = callback.take() {
                callback(packet);
            }
            Flow::Done
        })
    }

    /// Sends a single-response command and waits for its answer.
    async fn call(&self, command: Command) -> ClientResult<Packet> {
        let (done, wait) = oneshot::channel();
        let mut done = Some(done);
        self.send_command(command, move |packet: &Packet| {
            if let Some(done) = done.take() {
                let _ = done.send(packet.clone());
            }
            Flow::Done
        })?;
        let response = wait.await.map_err(|_| ClientError::Shutdown)?;
        if response.status().is_disconnected() {
            return Err(ClientError::Disconnected);
        }
        Ok(response)
    }
}
