//! # remc Async Client
//!
//! Purpose: Provide a pipelined, auto-reconnecting client for the memcached
//! binary protocol on top of tokio.
//!
//! ## Design Principles
//! 1. **Single Owner**: One task per connection owns all mutable protocol
//!    state; handles only send it messages.
//! 2. **Ordered Correlation**: Responses are matched to requests through a
//!    FIFO queue keyed by the opaque field.
//! 3. **Self-Healing**: Dead peers are found by keepalive probes and a
//!    receive timeout, then replaced after a jittered backoff.
//! 4. **Protocol Clarity**: Wire encoding lives in `remc-common`; this crate
//!    only frames, correlates and schedules.

mod client;
mod config;
mod connection;
mod error;
mod framing;
mod liveness;
mod pending;

pub use client::{Client, StatEntry};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ClientError, ClientResult};
pub use framing::FrameDecoder;
pub use liveness::{reconnect_delay, Liveness, LivenessClock};
pub use pending::{
    invoke, log_fault, Callback, CallbackFault, Dispatch, FaultHook, Flow, OpaqueCounter,
    PendingQueue,
};

pub use remc_common::{Command, Opcode, Packet, Status, Storage};
