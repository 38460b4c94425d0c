//! In-memory node store backend.

use dashmap::DashMap;
use rill_common::Hash256;

use crate::{NodeKind, NodeStore};

struct StoredObject {
    kind: NodeKind,
    seq: u32,
    bytes: Vec<u8>,
}

/// A concurrent in-memory [`NodeStore`].
///
/// Used in tests and by standalone nodes that do not retain history across
/// restarts.
#[derive(Default)]
pub struct MemoryNodeStore {
    objects: DashMap<Hash256, StoredObject>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Metadata for a stored object, if present.
    pub fn kind_of(&self, hash: &Hash256) -> Option<(NodeKind, u32)> {
        self.objects.get(hash).map(|obj| (obj.kind, obj.seq))
    }
}

impl NodeStore for MemoryNodeStore {
    fn put(&self, kind: NodeKind, seq: u32, bytes: Vec<u8>, hash: Hash256) {
        // First write wins; content addressing makes rewrites identical.
        self.objects
            .entry(hash)
            .or_insert_with(|| StoredObject { kind, seq, bytes });
    }

    fn get(&self, hash: &Hash256) -> Option<Vec<u8>> {
        self.objects.get(hash).map(|obj| obj.bytes.clone())
    }

    fn contains(&self, hash: &Hash256) -> bool {
        self.objects.contains_key(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let store = MemoryNodeStore::new();
        let hash = Hash256::from_bytes([1; 32]);
        assert!(store.get(&hash).is_none());

        store.put(NodeKind::AccountNode, 7, vec![1, 2, 3], hash);
        assert_eq!(store.get(&hash).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.kind_of(&hash), Some((NodeKind::AccountNode, 7)));
        assert!(store.contains(&hash));
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = MemoryNodeStore::new();
        let hash = Hash256::from_bytes([2; 32]);
        store.put(NodeKind::Ledger, 1, vec![1], hash);
        store.put(NodeKind::Ledger, 2, vec![9, 9], hash);
        assert_eq!(store.get(&hash).unwrap(), vec![1]);
        assert_eq!(store.len(), 1);
    }
}
