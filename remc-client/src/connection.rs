//! # Connection Task
//!
//! Purpose: Own one TCP connection to a memcached server, frame the inbound
//! byte stream, correlate responses, and keep the link alive across drops.
//!
//! ## Design Principles
//! 1. **Actor Model**: A single tokio task owns the socket, decoder, pending
//!    queue and opaque counter. Handles talk to it over an mpsc channel, so
//!    no lock guards the per-connection state.
//! 2. **Drain Per Read**: Every complete packet in the buffer is dispatched
//!    before the task awaits again.
//! 3. **Writes Never Stall Reads**: Stamped frames collect in an outgoing
//!    buffer flushed by its own `select!` branch, so a peer that stops
//!    reading still hits the receive timeout.
//! 4. **One Recovery Path**: Peer close, IO errors, framing errors and
//!    liveness timeouts all end the session the same way: notify pending
//!    callbacks, back off with jitter, reconnect.
//!
//! ## Lifecycle
//!
//! ```text
//! connect --> session --(lost)--> fail_all --> backoff --> connect
//!                |                                 |
//!                +--(close / handles dropped)------+--> fail_all --> exit
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant, MissedTickBehavior};

use remc_common::{stamp_opaque, CodecError, Command, Packet, HEADER_SIZE};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::framing::FrameDecoder;
use crate::liveness::{reconnect_delay, Liveness, LivenessClock};
use crate::pending::{self, Callback, Dispatch, FaultHook, OpaqueCounter, PendingQueue};

/// Requests from client handles to the connection task.
pub(crate) enum Message {
    /// Encoded request; the task stamps the opaque before writing.
    Send {
        frame: BytesMut,
        opcode: u8,
        callback: Option<Callback>,
    },
    /// Stop the task without reconnecting.
    Close,
}

/// Why a session ended.
#[derive(Debug, Error)]
enum Disconnect {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("framing error: {0}")]
    Framing(#[from] CodecError),
    #[error("no data received for {0:?}")]
    Timeout(std::time::Duration),
}

enum SessionEnd {
    Lost(Disconnect),
    Closed,
}

/// Opens a TCP connection with the configured timeout and socket options.
pub(crate) async fn open(config: &ClientConfig) -> ClientResult<TcpStream> {
    let addr = config.socket_addr()?;
    let stream = match config.connect_timeout() {
        Some(limit) => time::timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::ConnectTimeout)??,
        None => TcpStream::connect(addr).await?,
    };
    stream.set_nodelay(config.nodelay)?;
    Ok(stream)
}

pub(crate) struct Connection {
    config: ClientConfig,
    rx: UnboundedReceiver<Message>,
    connected: Arc<AtomicBool>,
    pending: PendingQueue,
    opaque: OpaqueCounter,
    hook: FaultHook,
}

impl Connection {
    pub(crate) fn new(
        config: ClientConfig,
        rx: UnboundedReceiver<Message>,
        connected: Arc<AtomicBool>,
        hook: FaultHook,
    ) -> Self {
        Connection {
            config,
            rx,
            connected,
            pending: PendingQueue::new(hook.clone()),
            opaque: OpaqueCounter::new(),
            hook,
        }
    }

    /// Drives sessions until closed. `stream` is the already-open first connection.
    pub(crate) async fn run(mut self, stream: TcpStream) {
        let mut stream = Some(stream);
        loop {
            let Some(current) = stream.take() else {
                break;
            };
            self.connected.store(true, Ordering::Release);
            let end = self.session(current).await;
            self.connected.store(false, Ordering::Release);

            let notified = self.pending.fail_all();
            let reason = match end {
                SessionEnd::Closed => {
                    tracing::info!(addr = %self.config.addr, notified, "connection closed");
                    break;
                }
                SessionEnd::Lost(reason) => reason,
            };
            match &reason {
                Disconnect::Framing(err) => {
                    tracing::error!(addr = %self.config.addr, error = %err, "framing error, dropping connection");
                }
                other => {
                    tracing::warn!(addr = %self.config.addr, reason = %other, notified, "disconnected");
                }
            }
            stream = self.reconnect().await;
        }
        self.shutdown();
    }

    /// Backs off and reconnects until a connection opens or the task is closed.
    async fn reconnect(&mut self) -> Option<TcpStream> {
        loop {
            let delay = reconnect_delay(
                self.config.reconnect_delay(),
                self.config.reconnect_jitter(),
                &mut rand::thread_rng(),
            );
            tracing::warn!(addr = %self.config.addr, ?delay, "reconnect scheduled");
            if !self.wait_disconnected(delay).await {
                return None;
            }
            match open(&self.config).await {
                Ok(stream) => {
                    tracing::info!(addr = %self.config.addr, "reconnected");
                    return Some(stream);
                }
                Err(err) => {
                    tracing::warn!(addr = %self.config.addr, error = %err, "reconnect failed");
                }
            }
        }
    }

    /// Sleeps for `delay`, answering requests with DISCONNECTED meanwhile.
    ///
    /// Returns false when the task should stop.
    async fn wait_disconnected(&mut self, delay: std::time::Duration) -> bool {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                message = self.rx.recv() => match message {
                    Some(Message::Send { opcode, callback, .. }) => self.reject(opcode, callback),
                    Some(Message::Close) | None => return false,
                },
            }
        }
    }

    async fn session(&mut self, stream: TcpStream) -> SessionEnd {
        let (mut reader, mut writer) = stream.into_split();
        let mut decoder = FrameDecoder::new(self.config.read_buffer_size);
        let mut outgoing = BytesMut::new();
        let now = Instant::now();
        let mut clock = LivenessClock::new(
            now,
            self.config.keepalive_interval(),
            self.config.receive_timeout(),
        );
        let period = self.config.liveness_check();
        let mut ticker = time::interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                read = reader.read_buf(decoder.buffer_mut()) => {
                    match read {
                        Ok(0) => return SessionEnd::Lost(Disconnect::PeerClosed),
                        Ok(_) => {
                            clock.touch(Instant::now());
                            if let Err(err) = self.drain(&mut decoder) {
                                return SessionEnd::Lost(err.into());
                            }
                        }
                        Err(err) => return SessionEnd::Lost(err.into()),
                    }
                }
                written = writer.write_buf(&mut outgoing), if !outgoing.is_empty() => {
                    match written {
                        Ok(0) => {
                            let err = io::Error::from(io::ErrorKind::WriteZero);
                            return SessionEnd::Lost(err.into());
                        }
                        Ok(_) => {}
                        Err(err) => return SessionEnd::Lost(err.into()),
                    }
                }
                message = self.rx.recv() => {
                    match message {
                        Some(Message::Send { frame, opcode, callback }) => {
                            self.stage(&mut outgoing, frame, opcode, callback);
                        }
                        Some(Message::Close) | None => return SessionEnd::Closed,
                    }
                }
                _ = ticker.tick() => {
                    match clock.check(Instant::now()) {
                        Liveness::Alive => {}
                        Liveness::Probe => {
                            tracing::debug!(addr = %self.config.addr, "idle, sending keepalive probe");
                            if let Err(err) = self.probe(&mut outgoing) {
                                return SessionEnd::Lost(err.into());
                            }
                        }
                        Liveness::Expired => {
                            let timeout = self.config.receive_timeout();
                            tracing::warn!(
                                addr = %self.config.addr,
                                ?timeout,
                                unsent = outgoing.len(),
                                "liveness timeout"
                            );
                            return SessionEnd::Lost(Disconnect::Timeout(timeout));
                        }
                    }
                }
            }
        }
    }

    /// Dispatches every complete packet currently buffered.
    fn drain(&mut self, decoder: &mut FrameDecoder) -> Result<(), CodecError> {
        while let Some(packet) = decoder.next_packet()? {
            match self.pending.dispatch(&packet) {
                Dispatch::Unmatched => {
                    tracing::debug!(opaque = packet.opaque(), "unmatched response dropped");
                }
                Dispatch::Completed { pruned }
                | Dispatch::Retained { pruned }
                | Dispatch::Faulted { pruned } => {
                    if pruned > 0 {
                        tracing::trace!(opaque = packet.opaque(), pruned, "pruned pending entries");
                    }
                }
            }
        }
        Ok(())
    }

    /// Assigns the opaque and queues the frame behind anything not yet written.
    fn stage(
        &mut self,
        outgoing: &mut BytesMut,
        mut frame: BytesMut,
        opcode: u8,
        callback: Option<Callback>,
    ) {
        let opaque = self.opaque.next();
        stamp_opaque(&mut frame, opaque);
        // Queued before the write so a failed write still gets notified.
        if let Some(callback) = callback {
            self.pending.push(opaque, opcode, callback);
        }
        outgoing.unsplit(frame);
    }

    fn probe(&mut self, outgoing: &mut BytesMut) -> Result<(), CodecError> {
        let noop = Command::Noop.into_packet();
        let mut frame = BytesMut::with_capacity(HEADER_SIZE);
        noop.encode(&mut frame)?;
        self.stage(outgoing, frame, noop.header.opcode, None);
        Ok(())
    }

    fn reject(&self, opcode: u8, callback: Option<Callback>) {
        match callback {
            Some(mut callback) => {
                let notice = Packet::disconnected(opcode, 0);
                pending::invoke(&mut callback, &notice, &self.hook);
            }
            None => tracing::debug!(opcode, "not connected, dropping request"),
        }
    }

    /// Refuses further requests and notifies anything still queued in the channel.
    fn shutdown(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            if let Message::Send { opcode, callback, .. } = message {
                self.reject(opcode, callback);
            }
        }
    }
}
