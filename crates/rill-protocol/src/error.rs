//! Error types for protocol operations.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Tried to read past the end of the input.
    #[error("unexpected end of input at offset {offset}, needed {needed} bytes")]
    ShortRead { offset: usize, needed: usize },

    /// A variable-length prefix was malformed or inconsistent.
    #[error("invalid length prefix: {0}")]
    BadLengthPrefix(String),

    /// A blob exceeds the maximum encodable length.
    #[error("value of {0} bytes exceeds the maximum encodable length")]
    Oversize(usize),

    /// An unknown ledger entry type tag.
    #[error("unknown ledger entry type 0x{0:04X}")]
    UnknownEntryType(u16),

    /// An unknown field code.
    #[error("unknown field code {0}")]
    UnknownField(u8),

    /// A field payload did not match its declared kind.
    #[error("malformed field payload: {0}")]
    BadField(String),
}
