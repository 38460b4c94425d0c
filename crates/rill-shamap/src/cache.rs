//! Shared tree caches.
//!
//! Both caches are keyed by node hash and safe to call from any thread. The
//! [`TreeNodeCache`] is the canonicaliser that gives the whole engine
//! structural sharing: every frozen node funnels through it, so equal nodes
//! in different ledgers are the same allocation.

use std::sync::Arc;
use std::time::Duration;

use rill_common::{Hash256, KeyCache, TaggedCache};

use crate::node::FrozenNode;

/// Content-addressed cache of frozen tree nodes.
pub struct TreeNodeCache {
    cache: TaggedCache<Hash256, FrozenNode>,
}

impl TreeNodeCache {
    pub fn new(target_size: usize, target_age: Duration) -> Self {
        Self {
            cache: TaggedCache::new("tree-nodes", target_size, target_age),
        }
    }

    /// Fetch a resident node.
    pub fn fetch(&self, hash: &Hash256) -> Option<Arc<FrozenNode>> {
        self.cache.fetch(hash)
    }

    /// Insert a node, returning the canonical shared copy. If an equal node
    /// is already resident, the caller's copy is discarded.
    pub fn canonicalize(&self, node: Arc<FrozenNode>) -> Arc<FrozenNode> {
        self.cache.canonicalize(node.hash, node)
    }

    pub fn sweep(&self) {
        self.cache.sweep()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Remembers subtree roots whose descendants are all resident locally.
///
/// Acquisition uses this to skip whole subtrees when hunting for missing
/// nodes.
pub struct FullBelowCache {
    cache: KeyCache<Hash256>,
}

impl FullBelowCache {
    pub fn new(target_size: usize, target_age: Duration) -> Self {
        Self {
            cache: KeyCache::new(target_size, target_age),
        }
    }

    /// Mark a subtree root as fully resident.
    pub fn insert(&self, hash: Hash256) {
        self.cache.insert(hash);
    }

    /// Refresh a mark if present; returns whether it was there.
    pub fn touch_if_exists(&self, hash: &Hash256) -> bool {
        self.cache.touch_if_exists(hash)
    }

    pub fn sweep(&self) {
        self.cache.sweep()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::SHAMapItem;
    use crate::node::{LeafNode, LeafType, TreeNode};

    fn frozen_leaf(byte: u8) -> Arc<FrozenNode> {
        let item = SHAMapItem::new(Hash256::from_bytes([byte; 32]), vec![byte]);
        Arc::new(FrozenNode::from_node(TreeNode::Leaf(LeafNode::new(
            Arc::new(item),
            LeafType::State,
        ))))
    }

    #[test]
    fn test_canonicalizing_insert() {
        let cache = TreeNodeCache::new(16, Duration::from_secs(60));
        let first = frozen_leaf(1);
        let hash = first.hash;

        let resident = cache.canonicalize(first);
        let duplicate = cache.canonicalize(frozen_leaf(1));
        assert!(Arc::ptr_eq(&resident, &duplicate));
        assert!(Arc::ptr_eq(&resident, &cache.fetch(&hash).unwrap()));
    }

    #[test]
    fn test_full_below_marks() {
        let cache = FullBelowCache::new(16, Duration::from_secs(60));
        let hash = Hash256::from_bytes([3; 32]);
        assert!(!cache.touch_if_exists(&hash));
        cache.insert(hash);
        assert!(cache.touch_if_exists(&hash));
    }
}
