//! # Request Variants
//!
//! Purpose: Typed constructors for every request this client issues.
//!
//! `Command` is a tagged union over the opcode catalog; `into_packet` picks
//! the variant's layout and fills extras by field name.

use bytes::Bytes;

use crate::opcode::Opcode;
use crate::packet::Packet;

/// Item metadata carried in SET/ADD extras.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Storage {
    pub flags: u32,
    /// Seconds (or absolute unix time), 0 means never expire.
    pub expiration: u32,
}

/// A request to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: Bytes },
    GetQ { key: Bytes },
    Add { key: Bytes, value: Bytes, storage: Storage },
    AddQ { key: Bytes, value: Bytes, storage: Storage },
    Set { key: Bytes, value: Bytes, storage: Storage },
    SetQ { key: Bytes, value: Bytes, storage: Storage },
    Delete { key: Bytes },
    DeleteQ { key: Bytes },
    /// `None` asks for general stats, `Some(group)` for a stats group.
    Stat { group: Option<Bytes> },
    Noop,
}

impl Command {
    pub fn get(key: impl Into<Bytes>) -> Self {
        Command::Get { key: key.into() }
    }

    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>, storage: Storage) -> Self {
        Command::Set {
            key: key.into(),
            value: value.into(),
            storage,
        }
    }

    pub fn add(key: impl Into<Bytes>, value: impl Into<Bytes>, storage: Storage) -> Self {
        Command::Add {
            key: key.into(),
            value: value.into(),
            storage,
        }
    }

    pub fn delete(key: impl Into<Bytes>) -> Self {
        Command::Delete { key: key.into() }
    }

    pub fn stat(group: Option<Bytes>) -> Self {
        Command::Stat { group }
    }

    /// Same request, answered only on failure.
    pub fn quiet(self) -> Self {
        match self {
            Command::Get { key } => Command::GetQ { key },
            Command::Add {
                key,
                value,
                storage,
            } => Command::AddQ {
                key,
                value,
                storage,
            },
            Command::Set {
                key,
                value,
                storage,
            } => Command::SetQ {
                key,
                value,
                storage,
            },
            Command::Delete { key } => Command::DeleteQ { key },
            other => other,
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Get { .. } => Opcode::Get,
            Command::GetQ { .. } => Opcode::GetQ,
            Command::Add { .. } => Opcode::Add,
            Command::AddQ { .. } => Opcode::AddQ,
            Command::Set { .. } => Opcode::Set,
            Command::SetQ { .. } => Opcode::SetQ,
            Command::Delete { .. } => Opcode::Delete,
            Command::DeleteQ { .. } => Opcode::DeleteQ,
            Command::Stat { .. } => Opcode::Stat,
            Command::Noop => Opcode::Noop,
        }
    }

    /// Builds the request packet (opaque left at zero).
    pub fn into_packet(self) -> Packet {
        let packet = Packet::request(self.opcode());
        match self {
            Command::Get { key }
            | Command::GetQ { key }
            | Command::Delete { key }
            | Command::DeleteQ { key } => packet.with_key(key),
            Command::Add {
                key,
                value,
                storage,
            }
            | Command::AddQ {
                key,
                value,
                storage,
            }
            | Command::Set {
                key,
                value,
                storage,
            }
            | Command::SetQ {
                key,
                value,
                storage,
            } => packet
                .with_key(key)
                .with_value(value)
                .with_extra("flags", storage.flags as u64)
                .with_extra("expiration", storage.expiration as u64),
            Command::Stat { group } => match group {
                Some(group) => packet.with_key(group),
                None => packet,
            },
            Command::Noop => packet,
        }
    }
}

impl From<Command> for Packet {
    fn from(command: Command) -> Self {
        command.into_packet()
    }
}
