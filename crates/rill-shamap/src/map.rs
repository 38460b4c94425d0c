//! The authenticated map.

use std::sync::Arc;

use rill_common::Hash256;
use rill_nodestore::{NodeKind, NodeStore};
use tracing::warn;

use crate::cache::{FullBelowCache, TreeNodeCache};
use crate::error::SHAMapError;
use crate::item::SHAMapItem;
use crate::node::{ChildSlot, FrozenNode, InnerNode, LeafNode, LeafType, TreeNode};
use crate::Result;

/// What the map stores, which fixes the leaf hash domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// Transactions without metadata.
    Transaction,
    /// Transactions with metadata appended.
    TransactionWithMeta,
    /// Account state entries.
    State,
}

/// Where frozen nodes are found: the shared cache first, then the backing
/// store. Cloneable so write paths can resolve nodes while the tree is
/// mutably borrowed.
#[derive(Clone)]
pub(crate) struct NodeSource {
    cache: Arc<TreeNodeCache>,
    backing: Option<Arc<dyn NodeStore>>,
}

impl NodeSource {
    pub(crate) fn fetch_from(
        &self,
        hash: &Hash256,
        extra: Option<&dyn NodeStore>,
    ) -> Result<Arc<FrozenNode>> {
        if let Some(node) = self.cache.fetch(hash) {
            return Ok(node);
        }
        let bytes = extra
            .and_then(|store| store.get(hash))
            .or_else(|| self.backing.as_ref().and_then(|store| store.get(hash)));
        if let Some(bytes) = bytes {
            let frozen = FrozenNode::from_wire(&bytes)?;
            if frozen.hash != *hash {
                warn!(wanted = %hash, got = %frozen.hash, "stored node fails content check");
                return Err(SHAMapError::MissingNode(*hash));
            }
            return Ok(self.cache.canonicalize(Arc::new(frozen)));
        }
        Err(SHAMapError::MissingNode(*hash))
    }

    pub(crate) fn fetch(&self, hash: &Hash256) -> Result<Arc<FrozenNode>> {
        self.fetch_from(hash, None)
    }
}

/// A radix-16 authenticated prefix tree over 256-bit keys.
pub struct SHAMap {
    kind: MapKind,
    root: ChildSlot,
    immutable: bool,
    synching: bool,
    ledger_seq: u32,
    source: NodeSource,
    full_below: Arc<FullBelowCache>,
}

impl SHAMap {
    /// An empty mutable map.
    pub fn new(
        kind: MapKind,
        node_cache: Arc<TreeNodeCache>,
        full_below: Arc<FullBelowCache>,
        backing: Option<Arc<dyn NodeStore>>,
    ) -> Self {
        Self {
            kind,
            root: ChildSlot::Empty,
            immutable: false,
            synching: false,
            ledger_seq: 0,
            source: NodeSource {
                cache: node_cache,
                backing,
            },
            full_below,
        }
    }

    /// A map whose root is known only by hash. The root node itself is
    /// attached later with [`SHAMap::fetch_root`].
    pub fn with_root(
        kind: MapKind,
        root_hash: Hash256,
        node_cache: Arc<TreeNodeCache>,
        full_below: Arc<FullBelowCache>,
        backing: Option<Arc<dyn NodeStore>>,
    ) -> Self {
        let mut map = Self::new(kind, node_cache, full_below, backing);
        if !root_hash.is_zero() {
            map.root = ChildSlot::Hash(root_hash);
        }
        map
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn is_synching(&self) -> bool {
        self.synching
    }

    /// Mark that subtrees may be missing and need supplying from outside.
    pub fn set_synching(&mut self) {
        self.synching = true;
    }

    pub fn clear_synching(&mut self) {
        self.synching = false;
    }

    pub fn ledger_seq(&self) -> u32 {
        self.ledger_seq
    }

    /// Record which ledger this map currently belongs to; used as metadata
    /// when flushing nodes.
    pub fn set_ledger_seq(&mut self, seq: u32) {
        self.ledger_seq = seq;
    }

    pub(crate) fn source(&self) -> &NodeSource {
        &self.source
    }

    pub(crate) fn root_slot(&self) -> &ChildSlot {
        &self.root
    }

    pub(crate) fn full_below(&self) -> &FullBelowCache {
        &self.full_below
    }

    fn leaf_type(&self, with_meta: bool) -> LeafType {
        match self.kind {
            MapKind::State => LeafType::State,
            MapKind::Transaction | MapKind::TransactionWithMeta => {
                if with_meta {
                    LeafType::TransactionWithMeta
                } else {
                    LeafType::Transaction
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Hashing
    // ------------------------------------------------------------------

    /// The root hash. Recomputes over the owned (dirty) spine only; frozen
    /// subtrees answer from their stored hashes.
    pub fn hash(&self) -> Hash256 {
        match &self.root {
            ChildSlot::Empty => Hash256::ZERO,
            ChildSlot::Hash(hash) => *hash,
            ChildSlot::Shared(frozen) => frozen.hash,
            ChildSlot::Owned(node) => node.compute_hash(),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The item stored under `tag`, if resident.
    pub fn peek_item(&self, tag: &Hash256) -> Result<Option<Arc<SHAMapItem>>> {
        Ok(self.peek_at(&self.root, tag, 0)?.map(|(item, _, _)| item))
    }

    /// The item stored under `tag` along with its canonical leaf hash.
    pub fn peek_item_with_hash(
        &self,
        tag: &Hash256,
    ) -> Result<Option<(Arc<SHAMapItem>, Hash256)>> {
        Ok(self
            .peek_at(&self.root, tag, 0)?
            .map(|(item, _, hash)| (item, hash)))
    }

    /// The item stored under `tag` along with its leaf hash domain.
    pub fn peek_item_with_type(
        &self,
        tag: &Hash256,
    ) -> Result<Option<(Arc<SHAMapItem>, LeafType)>> {
        Ok(self
            .peek_at(&self.root, tag, 0)?
            .map(|(item, leaf_type, _)| (item, leaf_type)))
    }

    /// Whether a leaf with this tag exists and is resident.
    pub fn has_item(&self, tag: &Hash256) -> Result<bool> {
        Ok(self.peek_item(tag)?.is_some())
    }

    fn peek_at(
        &self,
        slot: &ChildSlot,
        tag: &Hash256,
        depth: usize,
    ) -> Result<Option<(Arc<SHAMapItem>, LeafType, Hash256)>> {
        match slot {
            ChildSlot::Empty => Ok(None),
            ChildSlot::Owned(node) => self.peek_node(node, tag, depth),
            ChildSlot::Shared(frozen) => self.peek_node(&frozen.node, tag, depth),
            ChildSlot::Hash(hash) => {
                let frozen = self.source.fetch(hash)?;
                self.peek_node(&frozen.node, tag, depth)
            }
        }
    }

    fn peek_node(
        &self,
        node: &TreeNode,
        tag: &Hash256,
        depth: usize,
    ) -> Result<Option<(Arc<SHAMapItem>, LeafType, Hash256)>> {
        match node {
            TreeNode::Leaf(leaf) => {
                if leaf.item.tag() == *tag {
                    Ok(Some((Arc::clone(&leaf.item), leaf.leaf_type, leaf.hash())))
                } else {
                    Ok(None)
                }
            }
            TreeNode::Inner(inner) => {
                self.peek_at(&inner.children[tag.nibble(depth)], tag, depth + 1)
            }
        }
    }

    // ------------------------------------------------------------------
    // Ordered stepping
    // ------------------------------------------------------------------

    /// The smallest-tagged item.
    pub fn peek_first_item(&self) -> Result<Option<Arc<SHAMapItem>>> {
        self.leftmost(&self.root)
    }

    /// The largest-tagged item.
    pub fn peek_last_item(&self) -> Result<Option<Arc<SHAMapItem>>> {
        self.rightmost(&self.root)
    }

    /// The first item with a tag strictly greater than `tag`.
    pub fn peek_next_item(&self, tag: &Hash256) -> Result<Option<Arc<SHAMapItem>>> {
        self.next_at(&self.root, tag, 0)
    }

    /// The last item with a tag strictly less than `tag`.
    pub fn peek_prev_item(&self, tag: &Hash256) -> Result<Option<Arc<SHAMapItem>>> {
        self.prev_at(&self.root, tag, 0)
    }

    fn leftmost(&self, slot: &ChildSlot) -> Result<Option<Arc<SHAMapItem>>> {
        self.extreme(slot, false)
    }

    fn rightmost(&self, slot: &ChildSlot) -> Result<Option<Arc<SHAMapItem>>> {
        self.extreme(slot, true)
    }

    fn extreme(&self, slot: &ChildSlot, rightwards: bool) -> Result<Option<Arc<SHAMapItem>>> {
        let node_owner;
        let node = match slot {
            ChildSlot::Empty => return Ok(None),
            ChildSlot::Owned(node) => node.as_ref(),
            ChildSlot::Shared(frozen) => &frozen.node,
            ChildSlot::Hash(hash) => {
                node_owner = self.source.fetch(hash)?;
                &node_owner.node
            }
        };
        match node {
            TreeNode::Leaf(leaf) => Ok(Some(Arc::clone(&leaf.item))),
            TreeNode::Inner(inner) => {
                let order: Box<dyn Iterator<Item = usize>> = if rightwards {
                    Box::new((0..16).rev())
                } else {
                    Box::new(0..16)
                };
                for i in order {
                    if let Some(item) = self.extreme(&inner.children[i], rightwards)? {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
        }
    }

    fn next_at(
        &self,
        slot: &ChildSlot,
        tag: &Hash256,
        depth: usize,
    ) -> Result<Option<Arc<SHAMapItem>>> {
        let node_owner;
        let node = match slot {
            ChildSlot::Empty => return Ok(None),
            ChildSlot::Owned(node) => node.as_ref(),
            ChildSlot::Shared(frozen) => &frozen.node,
            ChildSlot::Hash(hash) => {
                node_owner = self.source.fetch(hash)?;
                &node_owner.node
            }
        };
        match node {
            TreeNode::Leaf(leaf) => {
                if leaf.item.tag() > *tag {
                    Ok(Some(Arc::clone(&leaf.item)))
                } else {
                    Ok(None)
                }
            }
            TreeNode::Inner(inner) => {
                let nib = tag.nibble(depth);
                if let Some(item) = self.next_at(&inner.children[nib], tag, depth + 1)? {
                    return Ok(Some(item));
                }
                for i in nib + 1..16 {
                    if let Some(item) = self.leftmost(&inner.children[i])? {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
        }
    }

    fn prev_at(
        &self,
        slot: &ChildSlot,
        tag: &Hash256,
        depth: usize,
    ) -> Result<Option<Arc<SHAMapItem>>> {
        let node_owner;
        let node = match slot {
            ChildSlot::Empty => return Ok(None),
            ChildSlot::Owned(node) => node.as_ref(),
            ChildSlot::Shared(frozen) => &frozen.node,
            ChildSlot::Hash(hash) => {
                node_owner = self.source.fetch(hash)?;
                &node_owner.node
            }
        };
        match node {
            TreeNode::Leaf(leaf) => {
                if leaf.item.tag() < *tag {
                    Ok(Some(Arc::clone(&leaf.item)))
                } else {
                    Ok(None)
                }
            }
            TreeNode::Inner(inner) => {
                let nib = tag.nibble(depth);
                if let Some(item) = self.prev_at(&inner.children[nib], tag, depth + 1)? {
                    return Ok(Some(item));
                }
                for i in (0..nib).rev() {
                    if let Some(item) = self.rightmost(&inner.children[i])? {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Visitors
    // ------------------------------------------------------------------

    /// Visit every item in tag order.
    pub fn visit_leaves(&self, visit: &mut dyn FnMut(&Arc<SHAMapItem>)) -> Result<()> {
        self.visit_leaves_at(&self.root, visit)
    }

    fn visit_leaves_at(
        &self,
        slot: &ChildSlot,
        visit: &mut dyn FnMut(&Arc<SHAMapItem>),
    ) -> Result<()> {
        let node_owner;
        let node = match slot {
            ChildSlot::Empty => return Ok(()),
            ChildSlot::Owned(node) => node.as_ref(),
            ChildSlot::Shared(frozen) => &frozen.node,
            ChildSlot::Hash(hash) => {
                node_owner = self.source.fetch(hash)?;
                &node_owner.node
            }
        };
        match node {
            TreeNode::Leaf(leaf) => {
                visit(&leaf.item);
                Ok(())
            }
            TreeNode::Inner(inner) => {
                for child in &inner.children {
                    self.visit_leaves_at(child, visit)?;
                }
                Ok(())
            }
        }
    }

    /// Visit every resident node in depth-first pre-order.
    pub fn visit_nodes(&self, visit: &mut dyn FnMut(&TreeNode)) -> Result<()> {
        self.visit_nodes_at(&self.root, visit)
    }

    fn visit_nodes_at(&self, slot: &ChildSlot, visit: &mut dyn FnMut(&TreeNode)) -> Result<()> {
        let node_owner;
        let node = match slot {
            ChildSlot::Empty => return Ok(()),
            ChildSlot::Owned(node) => node.as_ref(),
            ChildSlot::Shared(frozen) => &frozen.node,
            ChildSlot::Hash(hash) => {
                node_owner = self.source.fetch(hash)?;
                &node_owner.node
            }
        };
        visit(node);
        if let TreeNode::Inner(inner) = node {
            for child in &inner.children {
                self.visit_nodes_at(child, visit)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn check_mutable(&self) -> Result<()> {
        if self.immutable {
            Err(SHAMapError::Immutable)
        } else {
            Ok(())
        }
    }

    /// Insert an item; fails with `AlreadyExists` if the tag is present.
    pub fn add_item(&mut self, item: SHAMapItem, with_meta: bool) -> Result<()> {
        self.add_shared_item(Arc::new(item), with_meta)
    }

    /// Insert an already-shared item; fails with `AlreadyExists` if the tag
    /// is present.
    pub fn add_shared_item(&mut self, item: Arc<SHAMapItem>, with_meta: bool) -> Result<()> {
        self.check_mutable()?;
        let leaf = LeafNode::new(item, self.leaf_type(with_meta));
        let source = self.source.clone();
        insert_at(&source, &mut self.root, leaf, 0, false)
    }

    /// Replace the item under an existing tag; fails with `Missing` if the
    /// tag is absent.
    pub fn update_item(&mut self, item: SHAMapItem, with_meta: bool) -> Result<()> {
        self.update_shared_item(Arc::new(item), with_meta)
    }

    /// Replace with an already-shared item; fails with `Missing` if absent.
    pub fn update_shared_item(&mut self, item: Arc<SHAMapItem>, with_meta: bool) -> Result<()> {
        self.check_mutable()?;
        let leaf = LeafNode::new(item, self.leaf_type(with_meta));
        let source = self.source.clone();
        insert_at(&source, &mut self.root, leaf, 0, true)
    }

    /// Remove the item under `tag`; fails with `Missing` if absent.
    pub fn delete_item(&mut self, tag: &Hash256) -> Result<()> {
        self.check_mutable()?;
        let source = self.source.clone();
        delete_at(&source, &mut self.root, tag, 0)
    }

    // ------------------------------------------------------------------
    // Snapshots and freezing
    // ------------------------------------------------------------------

    /// A structurally shared copy. The owned spine is frozen first, so the
    /// copy and the original share every node; if the copy is mutable, its
    /// writes copy the touched spine and never disturb this map.
    pub fn snapshot(&mut self, make_mutable: bool) -> SHAMap {
        self.freeze_owned();
        SHAMap {
            kind: self.kind,
            root: self.root.clone(),
            immutable: !make_mutable,
            synching: self.synching,
            ledger_seq: self.ledger_seq,
            source: self.source.clone(),
            full_below: Arc::clone(&self.full_below),
        }
    }

    /// A structurally shared copy of an already-frozen map.
    ///
    /// Immutable maps are always frozen; a mutable map must not hold owned
    /// nodes when this is called (use [`SHAMap::snapshot`] there).
    pub fn frozen_snapshot(&self, make_mutable: bool) -> SHAMap {
        debug_assert!(
            !matches!(self.root, ChildSlot::Owned(_)),
            "frozen_snapshot on a dirty map"
        );
        SHAMap {
            kind: self.kind,
            root: self.root.clone(),
            immutable: !make_mutable,
            synching: self.synching,
            ledger_seq: self.ledger_seq,
            source: self.source.clone(),
            full_below: Arc::clone(&self.full_below),
        }
    }

    /// Freeze all owned nodes and refuse subsequent writes.
    pub fn set_immutable(&mut self) {
        self.freeze_owned();
        self.immutable = true;
    }

    fn freeze_owned(&mut self) {
        freeze_slot(&self.source.cache, &mut self.root);
    }

    /// Freeze and persist every owned node, returning how many were
    /// written.
    pub fn flush_dirty(&mut self, kind: NodeKind, seq: u32) -> usize {
        let backing = self.source.backing.clone();
        let mut written = 0;
        flush_slot(
            &self.source.cache,
            backing.as_deref(),
            kind,
            seq,
            &mut self.root,
            &mut written,
        );
        written
    }

    /// Attach the root node, which must hash to `expected`. `filter` is an
    /// extra node source tried ahead of the backing store, typically the
    /// acquisition layer's staging area.
    pub fn fetch_root(&mut self, expected: Hash256, filter: Option<&dyn NodeStore>) -> Result<()> {
        if expected.is_zero() {
            self.root = ChildSlot::Empty;
            return Ok(());
        }
        if let Some(frozen) = self.source.cache.fetch(&expected) {
            self.root = ChildSlot::Shared(frozen);
            return Ok(());
        }
        let bytes = filter
            .and_then(|store| store.get(&expected))
            .or_else(|| {
                self.source
                    .backing
                    .as_ref()
                    .and_then(|store| store.get(&expected))
            })
            .ok_or(SHAMapError::MissingNode(expected))?;
        let frozen = FrozenNode::from_wire(&bytes)?;
        if frozen.hash != expected {
            warn!(expected = %expected, actual = %frozen.hash, "root node hash mismatch");
            return Err(SHAMapError::HashMismatch {
                expected,
                actual: frozen.hash,
            });
        }
        self.root = ChildSlot::Shared(self.source.cache.canonicalize(Arc::new(frozen)));
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Write-path helpers. Free functions so the tree can be mutably borrowed
// while nodes are resolved through the shared source.
// ----------------------------------------------------------------------

fn materialize(source: &NodeSource, slot: &mut ChildSlot) -> Result<()> {
    let replacement = match slot {
        ChildSlot::Hash(hash) => {
            let frozen = source.fetch(hash)?;
            ChildSlot::Owned(Box::new(frozen.node.clone()))
        }
        ChildSlot::Shared(frozen) => ChildSlot::Owned(Box::new(frozen.node.clone())),
        _ => return Ok(()),
    };
    *slot = replacement;
    Ok(())
}

fn insert_at(
    source: &NodeSource,
    slot: &mut ChildSlot,
    new_leaf: LeafNode,
    depth: usize,
    update: bool,
) -> Result<()> {
    match slot {
        ChildSlot::Empty => {
            if update {
                return Err(SHAMapError::Missing(new_leaf.item.tag()));
            }
            *slot = ChildSlot::Owned(Box::new(TreeNode::Leaf(new_leaf)));
            Ok(())
        }
        ChildSlot::Hash(_) | ChildSlot::Shared(_) => {
            materialize(source, slot)?;
            insert_at(source, slot, new_leaf, depth, update)
        }
        ChildSlot::Owned(node) => match node.as_mut() {
            TreeNode::Inner(inner) => {
                let nib = new_leaf.item.tag().nibble(depth);
                insert_at(source, &mut inner.children[nib], new_leaf, depth + 1, update)
            }
            TreeNode::Leaf(existing) => {
                let new_tag = new_leaf.item.tag();
                if existing.item.tag() == new_tag {
                    if update {
                        *existing = new_leaf;
                        Ok(())
                    } else {
                        Err(SHAMapError::AlreadyExists(new_tag))
                    }
                } else if update {
                    Err(SHAMapError::Missing(new_tag))
                } else {
                    let old_leaf = existing.clone();
                    let old_tag = old_leaf.item.tag();

                    // Descend past the shared prefix, then fork.
                    let mut fork_depth = depth;
                    while new_tag.nibble(fork_depth) == old_tag.nibble(fork_depth) {
                        fork_depth += 1;
                    }
                    let mut fork = InnerNode::empty();
                    fork.children[old_tag.nibble(fork_depth)] =
                        ChildSlot::Owned(Box::new(TreeNode::Leaf(old_leaf)));
                    fork.children[new_tag.nibble(fork_depth)] =
                        ChildSlot::Owned(Box::new(TreeNode::Leaf(new_leaf)));

                    let mut chain = TreeNode::Inner(fork);
                    for d in (depth..fork_depth).rev() {
                        let mut inner = InnerNode::empty();
                        inner.children[new_tag.nibble(d)] =
                            ChildSlot::Owned(Box::new(chain));
                        chain = TreeNode::Inner(inner);
                    }
                    **node = chain;
                    Ok(())
                }
            }
        },
    }
}

fn delete_at(
    source: &NodeSource,
    slot: &mut ChildSlot,
    tag: &Hash256,
    depth: usize,
) -> Result<()> {
    enum After {
        Keep,
        MakeEmpty,
        Hoist(LeafNode),
    }

    match slot {
        ChildSlot::Empty => Err(SHAMapError::Missing(*tag)),
        ChildSlot::Hash(_) | ChildSlot::Shared(_) => {
            materialize(source, slot)?;
            delete_at(source, slot, tag, depth)
        }
        ChildSlot::Owned(node) => {
            let after = match node.as_mut() {
                TreeNode::Leaf(leaf) => {
                    if leaf.item.tag() == *tag {
                        After::MakeEmpty
                    } else {
                        return Err(SHAMapError::Missing(*tag));
                    }
                }
                TreeNode::Inner(inner) => {
                    delete_at(source, &mut inner.children[tag.nibble(depth)], tag, depth + 1)?;
                    match inner.child_count() {
                        0 => After::MakeEmpty,
                        1 => {
                            let idx = inner
                                .children
                                .iter()
                                .position(|child| !child.is_empty())
                                .expect("count was one");
                            let lone_leaf = match &inner.children[idx] {
                                ChildSlot::Owned(child) => match child.as_ref() {
                                    TreeNode::Leaf(leaf) => Some(leaf.clone()),
                                    TreeNode::Inner(_) => None,
                                },
                                ChildSlot::Shared(frozen) => match &frozen.node {
                                    TreeNode::Leaf(leaf) => Some(leaf.clone()),
                                    TreeNode::Inner(_) => None,
                                },
                                ChildSlot::Hash(hash) => match &source.fetch(hash)?.node {
                                    TreeNode::Leaf(leaf) => Some(leaf.clone()),
                                    TreeNode::Inner(_) => None,
                                },
                                ChildSlot::Empty => unreachable!(),
                            };
                            match lone_leaf {
                                Some(leaf) => After::Hoist(leaf),
                                None => After::Keep,
                            }
                        }
                        _ => After::Keep,
                    }
                }
            };
            match after {
                After::MakeEmpty => *slot = ChildSlot::Empty,
                After::Hoist(leaf) => {
                    *slot = ChildSlot::Owned(Box::new(TreeNode::Leaf(leaf)))
                }
                After::Keep => {}
            }
            Ok(())
        }
    }
}

/// Freeze an owned spine bottom-up, canonicalising into the cache. Returns
/// the slot's hash.
fn freeze_slot(cache: &TreeNodeCache, slot: &mut ChildSlot) -> Hash256 {
    match slot {
        ChildSlot::Empty => Hash256::ZERO,
        ChildSlot::Hash(hash) => *hash,
        ChildSlot::Shared(frozen) => frozen.hash,
        ChildSlot::Owned(_) => {
            let mut node = match std::mem::replace(slot, ChildSlot::Empty) {
                ChildSlot::Owned(node) => node,
                _ => unreachable!(),
            };
            if let TreeNode::Inner(inner) = node.as_mut() {
                for child in &mut inner.children {
                    freeze_slot(cache, child);
                }
            }
            let frozen = cache.canonicalize(Arc::new(FrozenNode::from_node(*node)));
            let hash = frozen.hash;
            *slot = ChildSlot::Shared(frozen);
            hash
        }
    }
}

/// As [`freeze_slot`], but also writes each newly frozen node to the
/// backing store.
fn flush_slot(
    cache: &TreeNodeCache,
    backing: Option<&dyn NodeStore>,
    kind: NodeKind,
    seq: u32,
    slot: &mut ChildSlot,
    written: &mut usize,
) -> Hash256 {
    match slot {
        ChildSlot::Empty => Hash256::ZERO,
        ChildSlot::Hash(hash) => *hash,
        ChildSlot::Shared(frozen) => frozen.hash,
        ChildSlot::Owned(_) => {
            let mut node = match std::mem::replace(slot, ChildSlot::Empty) {
                ChildSlot::Owned(node) => node,
                _ => unreachable!(),
            };
            if let TreeNode::Inner(inner) = node.as_mut() {
                for child in &mut inner.children {
                    flush_slot(cache, backing, kind, seq, child, written);
                }
            }
            let bytes = node.wire_bytes();
            let frozen = cache.canonicalize(Arc::new(FrozenNode::from_node(*node)));
            let hash = frozen.hash;
            if let Some(store) = backing {
                store.put(kind, seq, bytes, hash);
            }
            *written += 1;
            *slot = ChildSlot::Shared(frozen);
            hash
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_nodestore::MemoryNodeStore;
    use std::time::Duration;

    fn caches() -> (Arc<TreeNodeCache>, Arc<FullBelowCache>) {
        (
            Arc::new(TreeNodeCache::new(4096, Duration::from_secs(300))),
            Arc::new(FullBelowCache::new(4096, Duration::from_secs(300))),
        )
    }

    fn state_map() -> SHAMap {
        let (nodes, full) = caches();
        SHAMap::new(MapKind::State, nodes, full, None)
    }

    fn tag(byte: u8) -> Hash256 {
        Hash256::from_bytes([byte; 32])
    }

    fn item(byte: u8) -> SHAMapItem {
        SHAMapItem::new(tag(byte), vec![byte, byte + 1])
    }

    #[test]
    fn test_empty_map() {
        let map = state_map();
        assert_eq!(map.hash(), Hash256::ZERO);
        assert!(map.peek_first_item().unwrap().is_none());
        assert!(map.peek_last_item().unwrap().is_none());
        assert!(!map.has_item(&tag(1)).unwrap());
    }

    #[test]
    fn test_add_then_peek() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();
        let got = map.peek_item(&tag(1)).unwrap().unwrap();
        assert_eq!(got.data(), &[1, 2]);
        assert!(map.has_item(&tag(1)).unwrap());
        assert!(!map.has_item(&tag(2)).unwrap());
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();
        assert!(matches!(
            map.add_item(item(1), false),
            Err(SHAMapError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_update_missing_fails() {
        let mut map = state_map();
        assert!(matches!(
            map.update_item(item(1), false),
            Err(SHAMapError::Missing(_))
        ));
        map.add_item(item(1), false).unwrap();
        map.update_item(SHAMapItem::new(tag(1), vec![9]), false)
            .unwrap();
        assert_eq!(map.peek_item(&tag(1)).unwrap().unwrap().data(), &[9]);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();
        let h1 = map.hash();
        assert!(!h1.is_zero());

        map.add_item(item(2), false).unwrap();
        let h2 = map.hash();
        assert_ne!(h1, h2);

        map.delete_item(&tag(2)).unwrap();
        assert_eq!(map.hash(), h1);
    }

    #[test]
    fn test_hash_is_insertion_order_independent() {
        let mut a = state_map();
        let mut b = state_map();
        for byte in [3u8, 1, 7, 5] {
            a.add_item(item(byte), false).unwrap();
        }
        for byte in [5u8, 7, 1, 3] {
            b.add_item(item(byte), false).unwrap();
        }
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_split_on_shared_prefix() {
        let mut map = state_map();
        // Two tags sharing a long prefix force a chain of inner nodes.
        let mut bytes_a = [0xAB; 32];
        let mut bytes_b = [0xAB; 32];
        bytes_a[31] = 0x01;
        bytes_b[31] = 0x02;
        map.add_item(SHAMapItem::new(Hash256(bytes_a), vec![1]), false)
            .unwrap();
        map.add_item(SHAMapItem::new(Hash256(bytes_b), vec![2]), false)
            .unwrap();
        assert_eq!(
            map.peek_item(&Hash256(bytes_a)).unwrap().unwrap().data(),
            &[1]
        );
        assert_eq!(
            map.peek_item(&Hash256(bytes_b)).unwrap().unwrap().data(),
            &[2]
        );

        // Deleting one collapses the chain back to a lone leaf.
        map.delete_item(&Hash256(bytes_b)).unwrap();
        assert!(map.has_item(&Hash256(bytes_a)).unwrap());
        assert!(!map.has_item(&Hash256(bytes_b)).unwrap());
    }

    #[test]
    fn test_delete_last_item_empties_map() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();
        map.delete_item(&tag(1)).unwrap();
        assert_eq!(map.hash(), Hash256::ZERO);
        assert!(matches!(
            map.delete_item(&tag(1)),
            Err(SHAMapError::Missing(_))
        ));
    }

    #[test]
    fn test_ordered_stepping() {
        let mut map = state_map();
        let mut tags: Vec<Hash256> = [0x10u8, 0x80, 0x01, 0x44, 0xF0]
            .iter()
            .map(|&b| tag(b))
            .collect();
        for t in &tags {
            map.add_item(SHAMapItem::new(*t, vec![0]), false).unwrap();
        }
        tags.sort();

        assert_eq!(map.peek_first_item().unwrap().unwrap().tag(), tags[0]);
        assert_eq!(map.peek_last_item().unwrap().unwrap().tag(), tags[4]);

        // Forward walk visits every tag in order.
        let mut walked = vec![map.peek_first_item().unwrap().unwrap().tag()];
        while let Some(next) = map.peek_next_item(walked.last().unwrap()).unwrap() {
            walked.push(next.tag());
        }
        assert_eq!(walked, tags);

        // Backward walk is the reverse.
        let mut walked_back = vec![map.peek_last_item().unwrap().unwrap().tag()];
        while let Some(prev) = map.peek_prev_item(walked_back.last().unwrap()).unwrap() {
            walked_back.push(prev.tag());
        }
        walked.reverse();
        assert_eq!(walked_back, walked);
    }

    #[test]
    fn test_visit_leaves_in_order() {
        let mut map = state_map();
        for byte in [9u8, 2, 5] {
            map.add_item(item(byte), false).unwrap();
        }
        let mut seen = Vec::new();
        map.visit_leaves(&mut |item| seen.push(item.tag())).unwrap();
        assert_eq!(seen, vec![tag(2), tag(5), tag(9)]);
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();
        let before = map.hash();

        let snap = map.snapshot(false);
        assert_eq!(snap.hash(), before);

        map.add_item(item(2), false).unwrap();
        assert_ne!(map.hash(), before);
        assert_eq!(snap.hash(), before);
        assert!(!snap.has_item(&tag(2)).unwrap());
        assert!(map.has_item(&tag(2)).unwrap());
    }

    #[test]
    fn test_mutable_snapshot_copy_on_write() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();

        let mut fork = map.snapshot(true);
        fork.add_item(item(2), false).unwrap();

        assert!(fork.has_item(&tag(1)).unwrap());
        assert!(fork.has_item(&tag(2)).unwrap());
        assert!(!map.has_item(&tag(2)).unwrap());
    }

    #[test]
    fn test_immutable_map_rejects_writes() {
        let mut map = state_map();
        map.add_item(item(1), false).unwrap();
        map.set_immutable();
        assert!(matches!(
            map.add_item(item(2), false),
            Err(SHAMapError::Immutable)
        ));
        assert!(matches!(
            map.delete_item(&tag(1)),
            Err(SHAMapError::Immutable)
        ));
        // Reads still work.
        assert!(map.has_item(&tag(1)).unwrap());
    }

    #[test]
    fn test_flush_and_reload() {
        let store: Arc<MemoryNodeStore> = Arc::new(MemoryNodeStore::new());
        let (nodes, full) = caches();
        let mut map = SHAMap::new(
            MapKind::State,
            Arc::clone(&nodes),
            Arc::clone(&full),
            Some(store.clone() as Arc<dyn NodeStore>),
        );
        for byte in 0..20u8 {
            map.add_item(item(byte), false).unwrap();
        }
        let root = map.hash();
        let written = map.flush_dirty(NodeKind::AccountNode, 1);
        assert!(written > 0);

        // Reload through a fresh cache so every node comes from the store.
        let fresh_nodes = Arc::new(TreeNodeCache::new(4096, Duration::from_secs(300)));
        let fresh_full = Arc::new(FullBelowCache::new(4096, Duration::from_secs(300)));
        let mut reloaded = SHAMap::with_root(
            MapKind::State,
            root,
            fresh_nodes,
            fresh_full,
            Some(store as Arc<dyn NodeStore>),
        );
        reloaded.fetch_root(root, None).unwrap();
        assert_eq!(reloaded.hash(), root);

        let mut count = 0;
        reloaded
            .visit_leaves(&mut |leaf| {
                assert!(map.has_item(&leaf.tag()).unwrap());
                count += 1;
            })
            .unwrap();
        assert_eq!(count, 20);
    }

    #[test]
    fn test_missing_node_surfaces() {
        let (nodes, full) = caches();
        let absent = tag(0x77);
        let map = SHAMap::with_root(MapKind::State, absent, nodes, full, None);
        assert!(matches!(
            map.peek_item(&tag(1)),
            Err(SHAMapError::MissingNode(hash)) if hash == absent
        ));
    }

    #[test]
    fn test_fetch_root_hash_mismatch() {
        let store: Arc<MemoryNodeStore> = Arc::new(MemoryNodeStore::new());
        let (nodes, full) = caches();

        // Store a node under a key that is not its content hash.
        let leaf = TreeNode::Leaf(LeafNode::new(
            Arc::new(item(1)),
            LeafType::State,
        ));
        let declared = tag(0x55);
        store.put(NodeKind::AccountNode, 1, leaf.wire_bytes(), declared);

        let mut map = SHAMap::with_root(
            MapKind::State,
            declared,
            nodes,
            full,
            Some(store as Arc<dyn NodeStore>),
        );
        map.set_synching();
        assert!(matches!(
            map.fetch_root(declared, None),
            Err(SHAMapError::HashMismatch { expected, .. }) if expected == declared
        ));
        // The map stays unloaded: traversal still reports the root missing.
        assert!(matches!(
            map.peek_item(&tag(1)),
            Err(SHAMapError::MissingNode(hash)) if hash == declared
        ));
    }

    #[test]
    fn test_transaction_leaf_kinds() {
        let (nodes, full) = caches();
        let mut map = SHAMap::new(MapKind::TransactionWithMeta, nodes, full, None);
        map.add_item(SHAMapItem::new(tag(1), vec![7]), true).unwrap();
        map.add_item(SHAMapItem::new(tag(2), vec![7]), false)
            .unwrap();
        let (_, meta_type) = map.peek_item_with_type(&tag(1)).unwrap().unwrap();
        let (_, plain_type) = map.peek_item_with_type(&tag(2)).unwrap().unwrap();
        assert_eq!(meta_type, LeafType::TransactionWithMeta);
        assert_eq!(plain_type, LeafType::Transaction);
    }
}
