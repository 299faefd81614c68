//! # Codec Errors
//!
//! Purpose: Describe every way a packet can fail to parse or serialize.
//!
//! `Incomplete` is the only recoverable variant: the caller buffers more
//! bytes and retries. Everything else means the byte stream or the packet
//! itself is unusable.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors produced by the packet codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not enough bytes buffered yet.
    #[error("incomplete packet: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    /// First header byte does not match the expected direction.
    #[error("invalid magic byte: expected {expected:#04x}, found {found:#04x}")]
    InvalidMagic { expected: u8, found: u8 },

    /// Extras and key together exceed the declared body length.
    #[error("extras ({extras}) + key ({key}) exceed total body length ({total})")]
    InconsistentLengths { extras: u8, key: u16, total: u32 },

    /// Key does not fit the 16-bit key length field.
    #[error("key too long: {0} bytes")]
    KeyTooLong(usize),

    /// Encoded extras do not fit the 8-bit extras length field.
    #[error("extras too long: {0} bytes")]
    ExtrasTooLong(usize),

    /// Body does not fit the 32-bit total body length field.
    #[error("body too large: {0} bytes")]
    BodyTooLarge(usize),

    /// The locally synthesized DISCONNECTED status cannot be serialized.
    #[error("status has no wire representation")]
    SyntheticStatus,
}

impl CodecError {
    /// Returns true if this error only means more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_is_recoverable() {
        let err = CodecError::Incomplete {
            needed: 24,
            available: 3,
        };
        assert!(err.is_incomplete());
        assert!(!CodecError::InvalidMagic {
            expected: 0x81,
            found: 0x80
        }
        .is_incomplete());
        assert!(!CodecError::SyntheticStatus.is_incomplete());
    }

    #[test]
    fn display_formats_magic_in_hex() {
        let err = CodecError::InvalidMagic {
            expected: 0x81,
            found: 0x42,
        };
        assert_eq!(
            err.to_string(),
            "invalid magic byte: expected 0x81, found 0x42"
        );
    }
}
