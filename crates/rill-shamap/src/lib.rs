//! Authenticated radix-16 key/value tree.
//!
//! A [`SHAMap`] stores [`SHAMapItem`]s keyed by 256-bit tags in a patricia
//! trie of 16-way inner nodes. Every node has a canonical encoding whose
//! half-SHA-512 digest is the node's identity, so the root hash commits to
//! the whole tree. The engine keeps two of these per ledger: the transaction
//! tree and the account-state tree.
//!
//! # Snapshots and ownership
//!
//! A node is either *owned* (exclusively held by one mutable map, possibly
//! dirty) or *frozen* (hashed, immutable, shareable). Snapshots freeze the
//! owned spine and then share everything; the first write to a mutable
//! snapshot copies only the touched spine back into owned nodes. Frozen
//! subtrees are held by strong reference, so sharing is safe across threads
//! with no further synchronisation.
//!
//! # Partial trees
//!
//! A map in `synching` state may reference subtrees only by hash. Operations
//! that need a non-resident node fail with [`SHAMapError::MissingNode`],
//! which the acquisition layer turns into a fetch from peers; see
//! [`SHAMap::get_needed_hashes`].

pub mod cache;
pub mod error;
pub mod item;
pub mod map;
pub mod node;
pub mod sync;

pub use cache::{FullBelowCache, TreeNodeCache};
pub use error::SHAMapError;
pub use item::SHAMapItem;
pub use map::{MapKind, SHAMap};
pub use node::{ChildSlot, FrozenNode, InnerNode, LeafNode, LeafType, TreeNode};

/// Result type for tree operations.
pub type Result<T> = std::result::Result<T, SHAMapError>;
