//! # Response Framing
//!
//! Purpose: Turn an arbitrary split of the inbound byte stream into whole
//! response packets.
//!
//! ## Design Principles
//! 1. **Two States**: Wait for a 24-byte header, then wait for its body.
//!    The parsed header is held across reads, so a body split over many
//!    reads resumes where it left off.
//! 2. **Never Blocks**: `next_packet` returns `Ok(None)` as soon as the
//!    buffer cannot complete the current step.
//! 3. **No Resync**: A bad magic byte is returned as an error; the caller
//!    drops the connection rather than hunting for the next header.
//!
//! ## State Diagram
//!
//! ```text
//!            >= 24 bytes                 >= total_body_length bytes
//! HeaderWait ------------> BodyWait(h) ----------------------------> emit packet
//!     ^                                                                   |
//!     +-------------------------------------------------------------------+
//! ```

use bytes::{Buf, BytesMut};

use remc_common::{CodecResult, Header, Magic, Packet, HEADER_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    HeaderWait,
    BodyWait(Header),
}

/// Incremental decoder for the response direction.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new(capacity: usize) -> Self {
        FrameDecoder {
            buf: BytesMut::with_capacity(capacity),
            state: DecodeState::HeaderWait,
        }
    }

    /// Receive buffer, for reading straight from a socket.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True while a header has been consumed and its body is outstanding.
    pub fn in_body(&self) -> bool {
        matches!(self.state, DecodeState::BodyWait(_))
    }

    /// Drops all buffered bytes and returns to header-wait.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = DecodeState::HeaderWait;
    }

    /// Extracts the next complete packet, if the buffer holds one.
    pub fn next_packet(&mut self) -> CodecResult<Option<Packet>> {
        loop {
            match self.state {
                DecodeState::HeaderWait => {
                    if self.buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = Packet::parse_header(Magic::Response, &self.buf[..HEADER_SIZE])?;
                    self.buf.advance(HEADER_SIZE);
                    self.state = DecodeState::BodyWait(header);
                }
                DecodeState::BodyWait(header) => {
                    if self.buf.len() < header.total_body_length as usize {
                        return Ok(None);
                    }
                    let packet = Packet::parse_body(header, &mut self.buf)?;
                    self.state = DecodeState::HeaderWait;
                    return Ok(Some(packet));
                }
            }
        }
    }
}
