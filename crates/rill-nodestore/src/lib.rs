//! Persistence sinks for the rill ledger engine.
//!
//! Two stores live here:
//!
//! - The [`NodeStore`]: a content-addressed blob store holding ledger
//!   headers, inner tree nodes and leaves, keyed by their hash. Nodes are
//!   the source of truth; everything else can be rebuilt from them.
//! - The header index: a SQLite database of finalised ledger headers plus
//!   the transaction and account-transaction join tables, used for quick
//!   enumeration by sequence or hash.

pub mod error;
pub mod memory;
pub mod pool;
pub mod queries;
pub mod schema;

pub use error::StoreError;
pub use memory::MemoryNodeStore;
pub use pool::{Database, PooledConnection};
pub use queries::{AccountTxRow, HeaderIndexQueries, LedgerHeaderRow, TxIndexQueries, TxRow};

use rill_common::Hash256;

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// What kind of object a stored blob is.
///
/// The numeric values are persisted alongside the blobs and shared with
/// other implementations; do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeKind {
    /// A serialised ledger header.
    Ledger = 1,
    /// A transaction-tree leaf.
    Transaction = 2,
    /// An account-state tree node.
    AccountNode = 3,
    /// A transaction-tree inner node.
    TransactionNode = 4,
}

impl NodeKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Ledger),
            2 => Some(Self::Transaction),
            3 => Some(Self::AccountNode),
            4 => Some(Self::TransactionNode),
            _ => None,
        }
    }
}

/// A content-addressed store of node blobs.
///
/// Implementations must be safe to call from any thread, and `put` must be
/// idempotent: storing the same hash twice is a no-op.
pub trait NodeStore: Send + Sync {
    /// Store `bytes` under `hash`. `kind` and `seq` (the ledger sequence the
    /// object was written for) are retained as metadata.
    fn put(&self, kind: NodeKind, seq: u32, bytes: Vec<u8>, hash: Hash256);

    /// Fetch the blob stored under `hash`.
    fn get(&self, hash: &Hash256) -> Option<Vec<u8>>;

    /// Whether a blob is stored under `hash`.
    fn contains(&self, hash: &Hash256) -> bool {
        self.get(hash).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_roundtrip() {
        for kind in [
            NodeKind::Ledger,
            NodeKind::Transaction,
            NodeKind::AccountNode,
            NodeKind::TransactionNode,
        ] {
            assert_eq!(NodeKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(NodeKind::from_u8(0), None);
        assert_eq!(NodeKind::from_u8(9), None);
    }
}
