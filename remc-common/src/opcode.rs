// opcode.rs - command and status catalog for the memcached binary protocol
//
// ============================================================================
// QUIET COMMANDS
// ============================================================================
//
// Every mutating command has a "quiet" twin. The server answers a quiet
// request only when it fails (GETQ: only on a hit), so a client can pipeline
// many of them and pay for a single round trip. The client never waits for a
// quiet response; the pending queue simply skips over them once a later,
// non-quiet response arrives (see remc-client/src/pending.rs).
//
// ============================================================================
// STATUS CODES
// ============================================================================
//
// The 16-bit status field is only meaningful in responses. Values other than
// NO_ERROR are delivered to callers as ordinary data. DISCONNECTED is a local
// sentinel that never appears on the wire: it has no u16 value at all, so it
// cannot collide with anything a server sends.

/// Magic byte of a request packet.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte of a response packet.
pub const RESPONSE_MAGIC: u8 = 0x81;

// ============================================================================
// OPCODE NUMBERS
// ============================================================================

pub const OP_GET: u8 = 0x00;
pub const OP_SET: u8 = 0x01;
pub const OP_ADD: u8 = 0x02;
pub const OP_DELETE: u8 = 0x04;
pub const OP_GETQ: u8 = 0x09;
pub const OP_NOOP: u8 = 0x0A;
pub const OP_STAT: u8 = 0x10;
pub const OP_SETQ: u8 = 0x11;
pub const OP_ADDQ: u8 = 0x12;
pub const OP_DELETEQ: u8 = 0x14;

/// Packet direction, encoded in the first header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magic {
    Request = REQUEST_MAGIC,
    Response = RESPONSE_MAGIC,
}

impl Magic {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            REQUEST_MAGIC => Some(Self::Request),
            RESPONSE_MAGIC => Some(Self::Response),
            _ => None,
        }
    }
}

/// Opcodes modeled by this client.
///
/// Headers keep the raw byte, so responses carrying an opcode outside this
/// set still parse and correlate normally.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Get = OP_GET,
    Set = OP_SET,
    Add = OP_ADD,
    Delete = OP_DELETE,
    GetQ = OP_GETQ,
    Noop = OP_NOOP,
    Stat = OP_STAT,
    SetQ = OP_SETQ,
    AddQ = OP_ADDQ,
    DeleteQ = OP_DELETEQ,
}

impl Opcode {
    /// Convert opcode to its wire byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to create an opcode from its wire byte
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            OP_GET => Some(Self::Get),
            OP_SET => Some(Self::Set),
            OP_ADD => Some(Self::Add),
            OP_DELETE => Some(Self::Delete),
            OP_GETQ => Some(Self::GetQ),
            OP_NOOP => Some(Self::Noop),
            OP_STAT => Some(Self::Stat),
            OP_SETQ => Some(Self::SetQ),
            OP_ADDQ => Some(Self::AddQ),
            OP_DELETEQ => Some(Self::DeleteQ),
            _ => None,
        }
    }

    /// Get human-readable command name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Add => "ADD",
            Self::Delete => "DELETE",
            Self::GetQ => "GETQ",
            Self::Noop => "NOOP",
            Self::Stat => "STAT",
            Self::SetQ => "SETQ",
            Self::AddQ => "ADDQ",
            Self::DeleteQ => "DELETEQ",
        }
    }

    /// Check if the server stays silent on success
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::GetQ | Self::SetQ | Self::AddQ | Self::DeleteQ)
    }

    /// Returns the quiet twin, or `self` when none exists.
    pub const fn to_quiet(self) -> Self {
        match self {
            Self::Get => Self::GetQ,
            Self::Set => Self::SetQ,
            Self::Add => Self::AddQ,
            Self::Delete => Self::DeleteQ,
            other => other,
        }
    }

    /// Returns the non-quiet twin, or `self` when already non-quiet.
    pub const fn to_loud(self) -> Self {
        match self {
            Self::GetQ => Self::Get,
            Self::SetQ => Self::Set,
            Self::AddQ => Self::Add,
            Self::DeleteQ => Self::Delete,
            other => other,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Response status.
///
/// `Other` carries server codes this catalog does not name. `Disconnected`
/// is synthesized locally and has no wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    UnknownCommand,
    OutOfMemory,
    Other(u16),
    Disconnected,
}

impl Status {
    /// Map a wire status code. Never yields `Disconnected`.
    pub const fn from_wire(code: u16) -> Self {
        match code {
            0x0000 => Self::NoError,
            0x0001 => Self::KeyNotFound,
            0x0002 => Self::KeyExists,
            0x0003 => Self::ValueTooLarge,
            0x0004 => Self::InvalidArguments,
            0x0005 => Self::ItemNotStored,
            0x0006 => Self::NonNumericValue,
            0x0081 => Self::UnknownCommand,
            0x0082 => Self::OutOfMemory,
            other => Self::Other(other),
        }
    }

    /// Wire code for this status, `None` for the local sentinel.
    pub const fn to_wire(self) -> Option<u16> {
        match self {
            Self::NoError => Some(0x0000),
            Self::KeyNotFound => Some(0x0001),
            Self::KeyExists => Some(0x0002),
            Self::ValueTooLarge => Some(0x0003),
            Self::InvalidArguments => Some(0x0004),
            Self::ItemNotStored => Some(0x0005),
            Self::NonNumericValue => Some(0x0006),
            Self::UnknownCommand => Some(0x0081),
            Self::OutOfMemory => Some(0x0082),
            Self::Other(code) => Some(code),
            Self::Disconnected => None,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::NoError)
    }

    pub const fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoError => write!(f, "no error"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::KeyExists => write!(f, "key exists"),
            Self::ValueTooLarge => write!(f, "value too large"),
            Self::InvalidArguments => write!(f, "invalid arguments"),
            Self::ItemNotStored => write!(f, "item not stored"),
            Self::NonNumericValue => write!(f, "non-numeric value"),
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Other(code) => write!(f, "status {:#06x}", code),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
