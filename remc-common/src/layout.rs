//! # Field Descriptor Tables
//!
//! Purpose: Declare the wire layout of every packet variant as static data so
//! header and extras encoding is driven by one generic reader/writer.
//!
//! ## Design Principles
//! 1. **Tables, Not Hierarchies**: A variant is a header table plus an extras
//!    table. Variants that extend a base reuse the base header table and add
//!    their own extras table.
//! 2. **Big-Endian Only**: Every multi-byte field in the protocol is network
//!    order, so a width is all a field needs to describe its encoding.
//! 3. **Defaults Live With the Field**: Constructing a packet reads defaults
//!    straight from the table.
//!
//! ## Memory Layout Example
//!
//! ```text
//! Header (24 bytes total):
//! +--------+--------+-----------+-----------+-----------+-------------+
//! | magic  | opcode | key_len   | extras_len| data_type | status/rsvd |
//! | 1B     | 1B     | 2B        | 1B        | 1B        | 2B          |
//! +--------+--------+-----------+-----------+-----------+-------------+
//! | total_body_length:4B | opaque:4B | cas:8B                          |
//! +----------------------+-----------+---------------------------------+
//!
//! SET / ADD extras (8 bytes total):
//! +----------+---------------+
//! | flags:4B | expiration:4B |
//! +----------+---------------+
//! ```

use bytes::{Buf, BufMut};

use crate::opcode::{Magic, Opcode, REQUEST_MAGIC, RESPONSE_MAGIC};

/// Fixed header size shared by requests and responses.
pub const HEADER_SIZE: usize = 24;

/// Number of fields in a header table.
pub const HEADER_FIELDS: usize = 9;

/// Encoded width of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    /// Size in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    /// Largest value the width can carry.
    pub const fn max(self) -> u64 {
        match self {
            Width::U8 => u8::MAX as u64,
            Width::U16 => u16::MAX as u64,
            Width::U32 => u32::MAX as u64,
            Width::U64 => u64::MAX,
        }
    }
}

/// One named field of a header or extras table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub width: Width,
    pub default: u64,
}

impl FieldSpec {
    pub const fn new(name: &'static str, width: Width, default: u64) -> Self {
        FieldSpec {
            name,
            width,
            default,
        }
    }

    /// Reads one big-endian value. The caller guarantees enough bytes.
    pub fn read(&self, buf: &mut impl Buf) -> u64 {
        match self.width {
            Width::U8 => buf.get_u8() as u64,
            Width::U16 => buf.get_u16() as u64,
            Width::U32 => buf.get_u32() as u64,
            Width::U64 => buf.get_u64(),
        }
    }

    /// Writes one big-endian value, truncated to the field width.
    pub fn write(&self, value: u64, out: &mut impl BufMut) {
        match self.width {
            Width::U8 => out.put_u8(value as u8),
            Width::U16 => out.put_u16(value as u16),
            Width::U32 => out.put_u32(value as u32),
            Width::U64 => out.put_u64(value),
        }
    }
}

/// Total encoded size of a table.
pub fn table_size(fields: &[FieldSpec]) -> usize {
    fields.iter().map(|field| field.width.bytes()).sum()
}

// Header field positions; both header tables share this order.
pub(crate) const F_MAGIC: usize = 0;
pub(crate) const F_OPCODE: usize = 1;
pub(crate) const F_KEY_LENGTH: usize = 2;
pub(crate) const F_EXTRAS_LENGTH: usize = 3;
pub(crate) const F_DATA_TYPE: usize = 4;
pub(crate) const F_STATUS: usize = 5;
pub(crate) const F_TOTAL_BODY: usize = 6;
pub(crate) const F_OPAQUE: usize = 7;
pub(crate) const F_CAS: usize = 8;

pub const REQUEST_HEADER: [FieldSpec; HEADER_FIELDS] = [
    FieldSpec::new("magic", Width::U8, REQUEST_MAGIC as u64),
    FieldSpec::new("opcode", Width::U8, 0),
    FieldSpec::new("key_length", Width::U16, 0),
    FieldSpec::new("extras_length", Width::U8, 0),
    FieldSpec::new("data_type", Width::U8, 0),
    FieldSpec::new("reserved", Width::U16, 0),
    FieldSpec::new("total_body_length", Width::U32, 0),
    FieldSpec::new("opaque", Width::U32, 0),
    FieldSpec::new("cas", Width::U64, 0),
];

pub const RESPONSE_HEADER: [FieldSpec; HEADER_FIELDS] = [
    FieldSpec::new("magic", Width::U8, RESPONSE_MAGIC as u64),
    FieldSpec::new("opcode", Width::U8, 0),
    FieldSpec::new("key_length", Width::U16, 0),
    FieldSpec::new("extras_length", Width::U8, 0),
    FieldSpec::new("data_type", Width::U8, 0),
    FieldSpec::new("status", Width::U16, 0),
    FieldSpec::new("total_body_length", Width::U32, 0),
    FieldSpec::new("opaque", Width::U32, 0),
    FieldSpec::new("cas", Width::U64, 0),
];

/// SET/ADD request extras.
pub const STORAGE_EXTRAS: [FieldSpec; 2] = [
    FieldSpec::new("flags", Width::U32, 0),
    FieldSpec::new("expiration", Width::U32, 0),
];

/// GET/GETQ response extras.
pub const RETRIEVAL_EXTRAS: [FieldSpec; 1] = [FieldSpec::new("flags", Width::U32, 0)];

pub const NO_EXTRAS: [FieldSpec; 0] = [];

/// Wire layout of one packet variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub header: &'static [FieldSpec; HEADER_FIELDS],
    pub extras: &'static [FieldSpec],
}

impl Layout {
    /// Layout for a direction and raw opcode byte.
    ///
    /// Unknown opcodes get the bare header with no extras table.
    pub fn of(magic: Magic, opcode: u8) -> Layout {
        let op = Opcode::from_u8(opcode);
        match magic {
            Magic::Request => Layout {
                header: &REQUEST_HEADER,
                extras: match op {
                    Some(Opcode::Set | Opcode::SetQ | Opcode::Add | Opcode::AddQ) => {
                        &STORAGE_EXTRAS
                    }
                    _ => &NO_EXTRAS,
                },
            },
            Magic::Response => Layout {
                header: &RESPONSE_HEADER,
                extras: match op {
                    Some(Opcode::Get | Opcode::GetQ) => &RETRIEVAL_EXTRAS,
                    _ => &NO_EXTRAS,
                },
            },
        }
    }

    /// Position of a named extras field.
    pub fn extras_index(&self, name: &str) -> Option<usize> {
        self.extras.iter().position(|field| field.name == name)
    }
}
