//! Partial-tree acquisition support.
//!
//! A synching map may reference subtrees it does not hold. The walks here
//! enumerate the hashes still needed, short-circuiting subtrees the
//! full-below cache already knows to be complete.

use rill_common::Hash256;
use rill_nodestore::NodeStore;

use crate::map::SHAMap;
use crate::node::{ChildSlot, TreeNode};

struct Walk<'a> {
    map: &'a SHAMap,
    filter: Option<&'a dyn NodeStore>,
    max: usize,
    missing: Vec<Hash256>,
}

impl<'a> Walk<'a> {
    fn capped(&self) -> bool {
        self.missing.len() >= self.max
    }

    /// Walk a slot; returns whether every descendant is resident.
    fn walk_slot(&mut self, slot: &ChildSlot) -> bool {
        match slot {
            ChildSlot::Empty => true,
            ChildSlot::Owned(node) => self.walk_node(node),
            ChildSlot::Shared(frozen) => self.walk_node(&frozen.node),
            ChildSlot::Hash(hash) => {
                if self.map.full_below().touch_if_exists(hash) {
                    return true;
                }
                match self.map.source().fetch_from(hash, self.filter) {
                    Ok(frozen) => {
                        let full = self.walk_node(&frozen.node);
                        if full && !self.capped() {
                            self.map.full_below().insert(*hash);
                        }
                        full
                    }
                    Err(_) => {
                        if !self.capped() {
                            self.missing.push(*hash);
                        }
                        false
                    }
                }
            }
        }
    }

    fn walk_node(&mut self, node: &TreeNode) -> bool {
        match node {
            TreeNode::Leaf(_) => true,
            TreeNode::Inner(inner) => {
                let mut full = true;
                for child in &inner.children {
                    full &= self.walk_slot(child);
                    if self.capped() {
                        // Can't certify fullness once truncated.
                        return false;
                    }
                }
                full
            }
        }
    }
}

impl SHAMap {
    /// Up to `max` hashes of subtrees reachable from the resident frontier
    /// but not held locally. `filter` is an extra node source consulted
    /// ahead of the backing store.
    ///
    /// An empty result means the tree is complete below the root (or the
    /// root itself is empty).
    pub fn get_needed_hashes(
        &self,
        max: usize,
        filter: Option<&dyn NodeStore>,
    ) -> Vec<Hash256> {
        if max == 0 {
            return Vec::new();
        }
        let mut walk = Walk {
            map: self,
            filter,
            max,
            missing: Vec::new(),
        };
        let full = walk.walk_slot(self.root_slot());
        if full {
            if let Some(root_hash) = self.root_slot().known_hash() {
                if !root_hash.is_zero() && !walk.capped() {
                    self.full_below().insert(root_hash);
                }
            }
        }
        walk.missing
    }

    /// Partial traversal collecting up to `max` missing-node hashes, with
    /// no supplementary source.
    pub fn walk_map(&self, max: usize) -> Vec<Hash256> {
        self.get_needed_hashes(max, None)
    }
}
