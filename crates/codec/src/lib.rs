//! Wire codec for the ring protocol.
//!
//! All frames begin with a 1-byte type discriminant. Multi-byte integers
//! are little-endian on the wire, including address and port fields —
//! there is no additional network-byte-order conversion layered on top
//! (see DESIGN.md for why). Frames with variable-length fields carry
//! explicit 1-byte length prefixes.

pub mod frame;

pub use frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The buffer does not yet hold a full frame; the caller should wait
    /// for more bytes and must not partially consume what it has.
    Short,
    /// The leading byte does not match any known frame type. The caller
    /// should discard exactly one byte and retry (resync).
    UnknownType(u8),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short => write!(f, "buffer does not yet contain a full frame"),
            Self::UnknownType(ty) => write!(f, "unknown frame type {ty:#04x}"),
        }
    }
}
