//! # Packet Codec
//!
//! Purpose: Turn bytes into packets and packets into bytes.
//!
//! ## Design Principles
//! 1. **Table-Driven**: Header and extras are read and written by walking the
//!    descriptor tables in `layout`, never by hand-placed offsets.
//! 2. **Lengths Are Derived**: `serialize` recomputes key, extras and total
//!    body lengths from the actual contents. Length fields on a packet only
//!    reflect what was parsed.
//! 3. **Zero-Copy Bodies**: Key, value and extras are `Bytes` slices of the
//!    received body.
//!
//! ## Usage Notes
//!
//! - `Packet::parse_header` validates the magic byte for the expected
//!   direction; a mismatch is a framing error, not a short read.
//! - `Packet::parse_body` consumes exactly `total_body_length` bytes from the
//!   front of the buffer and leaves the rest in place.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};
use crate::layout::{
    FieldSpec, Layout, F_CAS, F_DATA_TYPE, F_EXTRAS_LENGTH, F_KEY_LENGTH, F_MAGIC, F_OPAQUE,
    F_OPCODE, F_STATUS, F_TOTAL_BODY, HEADER_FIELDS, HEADER_SIZE, NO_EXTRAS,
};
use crate::opcode::{Magic, Opcode, Status};

/// Byte offset of the opaque field inside an encoded header.
pub const OPAQUE_OFFSET: usize = 12;

/// Fixed 24-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: Magic,
    /// Raw opcode byte; see [`Header::command`].
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    /// Status in responses, reserved (zero) in requests.
    pub status: Status,
    pub total_body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    /// Builds a header from table defaults.
    pub fn new(magic: Magic, opcode: u8) -> Self {
        let table = Layout::of(magic, opcode).header;
        let mut values = [0u64; HEADER_FIELDS];
        for (slot, field) in values.iter_mut().zip(table.iter()) {
            *slot = field.default;
        }
        values[F_OPCODE] = opcode as u64;
        Header::from_values(magic, &values)
    }

    fn from_values(magic: Magic, values: &[u64; HEADER_FIELDS]) -> Self {
        Header {
            magic,
            opcode: values[F_OPCODE] as u8,
            key_length: values[F_KEY_LENGTH] as u16,
            extras_length: values[F_EXTRAS_LENGTH] as u8,
            data_type: values[F_DATA_TYPE] as u8,
            status: Status::from_wire(values[F_STATUS] as u16),
            total_body_length: values[F_TOTAL_BODY] as u32,
            opaque: values[F_OPAQUE] as u32,
            cas: values[F_CAS],
        }
    }

    /// Known opcode, if the raw byte is in the catalog.
    pub fn command(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Value length implied by the parsed length fields.
    pub fn value_length(&self) -> usize {
        (self.total_body_length as usize)
            .saturating_sub(self.extras_length as usize + self.key_length as usize)
    }
}

/// Structured extras decoded through a variant's extras table.
///
/// Bytes beyond the table (or an unknown variant's whole extras section) are
/// kept in `trailing` so nothing received is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extras {
    fields: &'static [FieldSpec],
    values: Vec<u64>,
    trailing: Bytes,
}

impl Extras {
    /// Extras populated with the table's defaults.
    pub fn with_defaults(fields: &'static [FieldSpec]) -> Self {
        Extras {
            fields,
            values: fields.iter().map(|field| field.default).collect(),
            trailing: Bytes::new(),
        }
    }

    /// Decodes extras. Fields the bytes do not cover are absent, not defaulted.
    pub fn decode(fields: &'static [FieldSpec], mut raw: Bytes) -> Self {
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            if raw.remaining() < field.width.bytes() {
                break;
            }
            values.push(field.read(&mut raw));
        }
        Extras {
            fields,
            values,
            trailing: raw,
        }
    }

    /// Appends the encoded extras to `out`.
    pub fn encode(&self, out: &mut impl BufMut) {
        for (value, field) in self.values.iter().zip(self.fields.iter()) {
            field.write(*value, out);
        }
        out.put_slice(&self.trailing);
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        crate::layout::table_size(&self.fields[..self.values.len()]) + self.trailing.len()
    }

    /// Value of a named field; `None` when the table lacks it or it was not received.
    pub fn get(&self, name: &str) -> Option<u64> {
        let idx = self.fields.iter().position(|field| field.name == name)?;
        self.values.get(idx).copied()
    }

    /// Sets a named field. Returns false when the table has no such field.
    ///
    /// Absent fields before it are filled with their defaults.
    pub fn set(&mut self, name: &str, value: u64) -> bool {
        let Some(idx) = self.fields.iter().position(|field| field.name == name) else {
            return false;
        };
        while self.values.len() <= idx {
            self.values.push(self.fields[self.values.len()].default);
        }
        self.values[idx] = value & self.fields[idx].width.max();
        true
    }

    pub fn fields(&self) -> &'static [FieldSpec] {
        self.fields
    }

    pub fn trailing(&self) -> &Bytes {
        &self.trailing
    }

    pub fn is_empty(&self) -> bool {
        self.encoded_len() == 0
    }
}

/// A request or response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub extras: Extras,
    pub key: Bytes,
    pub value: Bytes,
}

impl Packet {
    /// Empty packet with table defaults for the given direction and opcode.
    pub fn new(magic: Magic, opcode: u8) -> Self {
        Packet {
            header: Header::new(magic, opcode),
            extras: Extras::with_defaults(Layout::of(magic, opcode).extras),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn request(opcode: Opcode) -> Self {
        Packet::new(Magic::Request, opcode.as_u8())
    }

    pub fn response(opcode: Opcode) -> Self {
        Packet::new(Magic::Response, opcode.as_u8())
    }

    /// Locally synthesized response telling a caller its request was lost.
    pub fn disconnected(opcode: u8, opaque: u32) -> Self {
        let mut packet = Packet::new(Magic::Response, opcode);
        packet.header.status = Status::Disconnected;
        packet.header.opaque = opaque;
        packet.extras = Extras::with_defaults(&NO_EXTRAS);
        packet
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_extra(mut self, name: &str, value: u64) -> Self {
        self.extras.set(name, value);
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.header.cas = cas;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.header.status = status;
        self
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.header.opaque = opaque;
        self
    }

    pub fn status(&self) -> Status {
        self.header.status
    }

    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    pub fn command(&self) -> Option<Opcode> {
        self.header.command()
    }

    /// `flags` extra, when the variant has one.
    pub fn flags(&self) -> Option<u32> {
        self.extras.get("flags").map(|flags| flags as u32)
    }

    /// Decodes a 24-byte header, checking the magic byte against `expected`.
    pub fn parse_header(expected: Magic, buf: &[u8]) -> CodecResult<Header> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::Incomplete {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        if buf[0] != expected.as_u8() {
            return Err(CodecError::InvalidMagic {
                expected: expected.as_u8(),
                found: buf[0],
            });
        }

        let table = Layout::of(expected, buf[1]).header;
        let mut cursor = &buf[..HEADER_SIZE];
        let mut values = [0u64; HEADER_FIELDS];
        for (slot, field) in values.iter_mut().zip(table.iter()) {
            *slot = field.read(&mut cursor);
        }
        debug_assert_eq!(values[F_MAGIC], expected.as_u8() as u64);

        let header = Header::from_values(expected, &values);
        let prefix = header.extras_length as u32 + header.key_length as u32;
        if prefix > header.total_body_length {
            return Err(CodecError::InconsistentLengths {
                extras: header.extras_length,
                key: header.key_length,
                total: header.total_body_length,
            });
        }
        Ok(header)
    }

    /// Splits the body that follows `header` off the front of `buf`.
    pub fn parse_body(header: Header, buf: &mut BytesMut) -> CodecResult<Packet> {
        let total = header.total_body_length as usize;
        if buf.len() < total {
            return Err(CodecError::Incomplete {
                needed: total,
                available: buf.len(),
            });
        }

        let mut body = buf.split_to(total).freeze();
        let extras = body.split_to(header.extras_length as usize);
        let key = body.split_to(header.key_length as usize);
        let layout = Layout::of(header.magic, header.opcode);

        Ok(Packet {
            header,
            extras: Extras::decode(layout.extras, extras),
            key,
            value: body,
        })
    }

    /// Encodes the packet onto `out`, deriving all length fields.
    pub fn encode(&self, out: &mut BytesMut) -> CodecResult<()> {
        let extras_len = self.extras.encoded_len();
        if extras_len > u8::MAX as usize {
            return Err(CodecError::ExtrasTooLong(extras_len));
        }
        if self.key.len() > u16::MAX as usize {
            return Err(CodecError::KeyTooLong(self.key.len()));
        }
        let total = extras_len + self.key.len() + self.value.len();
        if total > u32::MAX as usize {
            return Err(CodecError::BodyTooLarge(total));
        }
        let status = self
            .header
            .status
            .to_wire()
            .ok_or(CodecError::SyntheticStatus)?;

        let mut values = [0u64; HEADER_FIELDS];
        values[F_MAGIC] = self.header.magic.as_u8() as u64;
        values[F_OPCODE] = self.header.opcode as u64;
        values[F_KEY_LENGTH] = self.key.len() as u64;
        values[F_EXTRAS_LENGTH] = extras_len as u64;
        values[F_DATA_TYPE] = self.header.data_type as u64;
        values[F_STATUS] = status as u64;
        values[F_TOTAL_BODY] = total as u64;
        values[F_OPAQUE] = self.header.opaque as u64;
        values[F_CAS] = self.header.cas;

        out.reserve(HEADER_SIZE + total);
        let table = Layout::of(self.header.magic, self.header.opcode).header;
        for (value, field) in values.iter().zip(table.iter()) {
            field.write(*value, out);
        }
        self.extras.encode(out);
        out.put_slice(&self.key);
        out.put_slice(&self.value);
        Ok(())
    }

    /// Encodes the packet into a fresh buffer.
    pub fn serialize(&self) -> CodecResult<Bytes> {
        let mut out = BytesMut::new();
        self.encode(&mut out)?;
        Ok(out.freeze())
    }
}

/// Overwrites the opaque field of an already encoded packet.
///
/// Panics if `frame` is shorter than a header.
pub fn stamp_opaque(frame: &mut [u8], opaque: u32) {
    frame[OPAQUE_OFFSET..OPAQUE_OFFSET + 4].copy_from_slice(&opaque.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(expected: Magic, bytes: &[u8]) -> Packet {
        let header = Packet::parse_header(expected, bytes).unwrap();
        let mut rest = BytesMut::from(&bytes[HEADER_SIZE..]);
        let packet = Packet::parse_body(header, &mut rest).unwrap();
        assert!(rest.is_empty());
        packet
    }

    #[test]
    fn set_request_wire_layout() {
        let packet = Packet::request(Opcode::Set)
            .with_key("k")
            .with_value("vv")
            .with_extra("flags", 0xdead_beef)
            .with_extra("expiration", 60)
            .with_opaque(7);
        let wire = packet.serialize().unwrap();

        assert_eq!(wire.len(), HEADER_SIZE + 8 + 1 + 2);
        assert_eq!(wire[0], 0x80);
        assert_eq!(wire[1], 0x01);
        assert_eq!(&wire[2..4], &[0, 1]);
        assert_eq!(wire[4], 8);
        assert_eq!(&wire[8..12], &[0, 0, 0, 11]);
        assert_eq!(&wire[12..16], &[0, 0, 0, 7]);
        assert_eq!(&wire[24..28], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&wire[28..32], &[0, 0, 0, 60]);
        assert_eq!(&wire[32..], b"kvv");
    }

    #[test]
    fn request_roundtrip_recomputes_lengths() {
        let mut packet = Packet::request(Opcode::Add)
            .with_key("alpha")
            .with_value("beta")
            .with_extra("flags", 3)
            .with_cas(99);
        // Caller-set lengths are ignored on the wire.
        packet.header.key_length = 1000;
        packet.header.total_body_length = 1;

        let parsed = decode(Magic::Request, &packet.serialize().unwrap());
        assert_eq!(parsed.header.key_length, 5);
        assert_eq!(parsed.header.extras_length, 8);
        assert_eq!(parsed.header.total_body_length, 17);
        assert_eq!(parsed.header.cas, 99);
        assert_eq!(parsed.key, packet.key);
        assert_eq!(parsed.value, packet.value);
        assert_eq!(parsed.extras.get("flags"), Some(3));
        assert_eq!(parsed.extras.get("expiration"), Some(0));
    }

    #[test]
    fn response_roundtrip_keeps_status_and_flags() {
        let packet = Packet::response(Opcode::Get)
            .with_value("hello")
            .with_extra("flags", 42)
            .with_status(Status::Other(0x86))
            .with_opaque(u32::MAX);
        let parsed = decode(Magic::Response, &packet.serialize().unwrap());
        assert_eq!(parsed.status(), Status::Other(0x86));
        assert_eq!(parsed.flags(), Some(42));
        assert_eq!(parsed.opaque(), u32::MAX);
        assert_eq!(parsed.value, Bytes::from_static(b"hello"));
    }

    #[test]
    fn zero_body_yields_empty_sections() {
        let wire = Packet::response(Opcode::Noop).serialize().unwrap();
        assert_eq!(wire.len(), HEADER_SIZE);
        let parsed = decode(Magic::Response, &wire);
        assert!(parsed.key.is_empty());
        assert!(parsed.value.is_empty());
        assert!(parsed.extras.is_empty());
    }

    #[test]
    fn wrong_magic_is_not_a_packet() {
        let wire = Packet::request(Opcode::Noop).serialize().unwrap();
        let err = Packet::parse_header(Magic::Response, &wire).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidMagic {
                expected: 0x81,
                found: 0x80
            }
        );
        assert!(!err.is_incomplete());
    }

    #[test]
    fn short_header_is_incomplete() {
        let err = Packet::parse_header(Magic::Response, &[0x81; 10]).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn inconsistent_lengths_are_rejected() {
        let mut wire = BytesMut::from(&Packet::response(Opcode::Get).serialize().unwrap()[..]);
        wire[2..4].copy_from_slice(&5u16.to_be_bytes());
        let err = Packet::parse_header(Magic::Response, &wire).unwrap_err();
        assert!(matches!(err, CodecError::InconsistentLengths { key: 5, .. }));
    }

    #[test]
    fn parse_body_leaves_following_bytes() {
        let first = Packet::response(Opcode::Stat).with_key("pid").with_value("1");
        let second = Packet::response(Opcode::Stat);
        let mut buf = BytesMut::new();
        first.encode(&mut buf).unwrap();
        second.encode(&mut buf).unwrap();

        let header = Packet::parse_header(Magic::Response, &buf).unwrap();
        buf.advance(HEADER_SIZE);
        let parsed = Packet::parse_body(header, &mut buf).unwrap();
        assert_eq!(parsed.key, Bytes::from_static(b"pid"));
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn short_extras_leave_fields_absent() {
        let mut extras =
            Extras::decode(&crate::layout::STORAGE_EXTRAS, Bytes::from_static(&[0, 0, 0, 9]));
        assert_eq!(extras.get("flags"), Some(9));
        assert_eq!(extras.get("expiration"), None);
        assert_eq!(extras.encoded_len(), 4);

        assert!(extras.set("expiration", 30));
        assert_eq!(extras.get("expiration"), Some(30));
        assert_eq!(extras.encoded_len(), 8);
    }

    #[test]
    fn get_miss_without_extras_has_no_flags() {
        let mut miss = Packet::response(Opcode::Get).with_status(Status::KeyNotFound);
        miss.extras = Extras::decode(&crate::layout::RETRIEVAL_EXTRAS, Bytes::new());
        let wire = miss.serialize().unwrap();
        assert_eq!(wire.len(), HEADER_SIZE);

        let parsed = decode(Magic::Response, &wire);
        assert_eq!(parsed.header.extras_length, 0);
        assert_eq!(parsed.flags(), None);
        assert_eq!(parsed.serialize().unwrap(), wire);
    }

    #[test]
    fn unknown_extras_are_preserved() {
        let mut wire = BytesMut::new();
        let mut packet = Packet::new(Magic::Response, 0x42);
        packet.extras = Extras::decode(&crate::layout::NO_EXTRAS, Bytes::from_static(b"xyz"));
        packet.encode(&mut wire).unwrap();
        let parsed = decode(Magic::Response, &wire);
        assert_eq!(parsed.extras.trailing(), &Bytes::from_static(b"xyz"));
        assert_eq!(parsed.header.command(), None);
    }

    #[test]
    fn disconnected_status_cannot_be_serialized() {
        let err = Packet::disconnected(Opcode::Set.as_u8(), 1).serialize().unwrap_err();
        assert_eq!(err, CodecError::SyntheticStatus);
    }

    #[test]
    fn disconnected_notice_keeps_opcode_without_extras() {
        let notice = Packet::disconnected(Opcode::Get.as_u8(), 12);
        assert_eq!(notice.command(), Some(Opcode::Get));
        assert_eq!(notice.opaque(), 12);
        assert!(notice.status().is_disconnected());
        assert_eq!(notice.flags(), None);
    }

    #[test]
    fn oversized_key_is_rejected() {
        let key = vec![b'k'; u16::MAX as usize + 1];
        let err = Packet::request(Opcode::Get).with_key(key).serialize().unwrap_err();
        assert_eq!(err, CodecError::KeyTooLong(u16::MAX as usize + 1));
    }

    #[test]
    fn stamp_opaque_patches_header() {
        let mut wire = BytesMut::from(&Packet::request(Opcode::Noop).serialize().unwrap()[..]);
        stamp_opaque(&mut wire, 0x0102_0304);
        let header = Packet::parse_header(Magic::Request, &wire).unwrap();
        assert_eq!(header.opaque, 0x0102_0304);
    }
}
