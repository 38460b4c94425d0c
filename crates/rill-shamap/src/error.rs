//! Error types for tree operations.

use rill_common::Hash256;
use thiserror::Error;

/// Errors from [`crate::SHAMap`] operations.
#[derive(Debug, Error)]
pub enum SHAMapError {
    /// Traversal needed a node that is not resident locally.
    #[error("missing tree node {0}")]
    MissingNode(Hash256),

    /// A fetched root did not hash to the declared value.
    #[error("root hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash256, actual: Hash256 },

    /// An item with this tag is already present.
    #[error("item {0} already exists")]
    AlreadyExists(Hash256),

    /// No item with this tag is present.
    #[error("item {0} is missing")]
    Missing(Hash256),

    /// A write was attempted on a frozen map.
    #[error("map is immutable")]
    Immutable,

    /// A stored node blob could not be decoded.
    #[error("invalid node encoding: {0}")]
    InvalidNode(String),
}
