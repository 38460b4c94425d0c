//! Error types for ledger operations.

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Tree operation failed.
    #[error("map error: {0}")]
    Map(#[from] rill_shamap::SHAMapError),

    /// Encoding or decoding failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] rill_protocol::ProtocolError),

    /// Persistence failed.
    #[error("store error: {0}")]
    Store(#[from] rill_nodestore::StoreError),

    /// A loaded header did not hash to its recorded value.
    #[error("ledger hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// A mutation was attempted on an immutable ledger.
    #[error("ledger is immutable")]
    Immutable,

    /// A directory page was absent or malformed.
    #[error("bad directory: {0}")]
    BadDirectory(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}
