// remc-common - Packet codec and command catalog for the memcached binary protocol
//
// This crate is pure data transformation: no sockets, no runtime.

pub mod command;
pub mod error;
pub mod layout;
pub mod opcode;
pub mod packet;

// Re-export for convenience
pub use command::*;
pub use error::*;
pub use layout::{FieldSpec, Layout, Width, HEADER_SIZE};
pub use opcode::*;
pub use packet::*;
