//! Wire encoding, key derivation and ledger entries.
//!
//! This crate owns the deterministic byte layer of the engine:
//!
//! - [`Serializer`] / [`SerializerIterator`]: byte-exact writing and reading
//!   of primitive fields and length-prefixed blobs.
//! - [`keys`]: the pure functions that map logical object descriptors
//!   (accounts, offers, directories, trust lines, skiplist pages, order
//!   books) to their 256-bit tree keys.
//! - [`LedgerEntry`]: the tagged field-map record stored at state leaves.

pub mod entry;
pub mod error;
pub mod keys;
pub mod serializer;

pub use entry::{FieldId, FieldValue, LedgerEntry, LedgerEntryType};
pub use error::ProtocolError;
pub use keys::{Book, Issue, SpaceTag};
pub use serializer::{Serializer, SerializerIterator};

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
