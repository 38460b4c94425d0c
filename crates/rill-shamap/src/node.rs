//! Tree nodes.
//!
//! A node is either an inner node with sixteen child slots or a leaf
//! carrying one item. The canonical wire encoding of a node is exactly its
//! hash preimage, so `sha512_half(bytes)` of a stored node is its content
//! address and fetched nodes verify themselves.

use std::sync::Arc;

use rill_common::Hash256;
use rill_crypto::{sha512_half, HashPrefix, Sha512HalfHasher};

use crate::error::SHAMapError;
use crate::item::SHAMapItem;
use crate::Result;

/// Children per inner node.
pub const BRANCH_FACTOR: usize = 16;

/// What hash domain a leaf occupies.
///
/// The domain enters the leaf hash, so a transaction leaf can never collide
/// with a state leaf holding the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafType {
    /// Transaction blob; the leaf hash is the transaction id.
    Transaction,
    /// Transaction blob followed by its metadata, both length-prefixed.
    TransactionWithMeta,
    /// Serialised ledger entry.
    State,
}

impl LeafType {
    fn prefix(self) -> HashPrefix {
        match self {
            LeafType::Transaction => HashPrefix::TransactionId,
            LeafType::TransactionWithMeta => HashPrefix::TxNode,
            LeafType::State => HashPrefix::LeafNode,
        }
    }
}

/// One child position of an inner node.
#[derive(Debug, Clone)]
pub enum ChildSlot {
    /// No subtree here.
    Empty,
    /// Subtree known only by hash; resolving it needs the cache or store.
    Hash(Hash256),
    /// Frozen resident subtree, shareable across maps and threads.
    Shared(Arc<FrozenNode>),
    /// Subtree owned exclusively by one mutable map; hash not yet computed.
    Owned(Box<TreeNode>),
}

impl ChildSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, ChildSlot::Empty)
    }

    /// The child's hash, when it can be had without recomputation.
    ///
    /// `None` for owned (dirty) subtrees.
    pub fn known_hash(&self) -> Option<Hash256> {
        match self {
            ChildSlot::Empty => Some(Hash256::ZERO),
            ChildSlot::Hash(hash) => Some(*hash),
            ChildSlot::Shared(frozen) => Some(frozen.hash),
            ChildSlot::Owned(_) => None,
        }
    }
}

/// An inner node: sixteen child slots.
#[derive(Debug, Clone)]
pub struct InnerNode {
    pub children: [ChildSlot; BRANCH_FACTOR],
}

impl InnerNode {
    pub fn empty() -> Self {
        Self {
            children: std::array::from_fn(|_| ChildSlot::Empty),
        }
    }

    /// Number of non-empty children.
    pub fn child_count(&self) -> usize {
        self.children.iter().filter(|c| !c.is_empty()).count()
    }
}

/// A leaf node: one item in a hash domain.
#[derive(Debug, Clone)]
pub struct LeafNode {
    pub item: Arc<SHAMapItem>,
    pub leaf_type: LeafType,
}

impl LeafNode {
    pub fn new(item: Arc<SHAMapItem>, leaf_type: LeafType) -> Self {
        Self { item, leaf_type }
    }

    /// The leaf's canonical hash.
    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha512HalfHasher::new();
        hasher.update(&self.leaf_type.prefix().to_be_bytes());
        hasher.update(self.item.data());
        if self.leaf_type != LeafType::Transaction {
            hasher.update(self.item.tag().as_bytes());
        }
        hasher.finalize()
    }
}

/// A tree node.
#[derive(Debug, Clone)]
pub enum TreeNode {
    Inner(InnerNode),
    Leaf(LeafNode),
}

impl TreeNode {
    /// Compute this node's hash. Inner children must all be frozen
    /// (`Empty`/`Hash`/`Shared`); owned subtrees are hashed recursively.
    pub fn compute_hash(&self) -> Hash256 {
        match self {
            TreeNode::Leaf(leaf) => leaf.hash(),
            TreeNode::Inner(inner) => {
                let mut hashes = [[0u8; 32]; BRANCH_FACTOR];
                let mut all_empty = true;
                for (i, child) in inner.children.iter().enumerate() {
                    let hash = match child.known_hash() {
                        Some(hash) => hash,
                        None => match child {
                            ChildSlot::Owned(node) => node.compute_hash(),
                            _ => unreachable!(),
                        },
                    };
                    if !hash.is_zero() {
                        all_empty = false;
                    }
                    hashes[i] = hash.0;
                }
                if all_empty {
                    return Hash256::ZERO;
                }
                let mut hasher = Sha512HalfHasher::new();
                hasher.update(&HashPrefix::InnerNode.to_be_bytes());
                for hash in &hashes {
                    hasher.update(hash);
                }
                hasher.finalize()
            }
        }
    }

    /// The canonical wire encoding; also the hash preimage.
    ///
    /// Inner children must all be frozen.
    pub fn wire_bytes(&self) -> Vec<u8> {
        match self {
            TreeNode::Inner(inner) => {
                let mut bytes = Vec::with_capacity(4 + BRANCH_FACTOR * 32);
                bytes.extend_from_slice(&HashPrefix::InnerNode.to_be_bytes());
                for child in &inner.children {
                    let hash = child
                        .known_hash()
                        .expect("inner node must be frozen before encoding");
                    bytes.extend_from_slice(hash.as_bytes());
                }
                bytes
            }
            TreeNode::Leaf(leaf) => {
                let data = leaf.item.data();
                let mut bytes = Vec::with_capacity(4 + data.len() + 32);
                bytes.extend_from_slice(&leaf.leaf_type.prefix().to_be_bytes());
                bytes.extend_from_slice(data);
                if leaf.leaf_type != LeafType::Transaction {
                    bytes.extend_from_slice(leaf.item.tag().as_bytes());
                }
                bytes
            }
        }
    }
}

/// A frozen node: an immutable [`TreeNode`] together with its hash.
///
/// Frozen inner nodes only reference children that are themselves frozen.
#[derive(Debug)]
pub struct FrozenNode {
    pub hash: Hash256,
    pub node: TreeNode,
}

impl FrozenNode {
    /// Freeze a node whose children are already frozen.
    pub fn from_node(node: TreeNode) -> Self {
        let hash = node.compute_hash();
        Self { hash, node }
    }

    /// Decode a node from its wire bytes, recovering its hash from the
    /// bytes themselves.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(SHAMapError::InvalidNode("shorter than a prefix".into()));
        }
        let prefix_value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let prefix = HashPrefix::from_u32(prefix_value).ok_or_else(|| {
            SHAMapError::InvalidNode(format!("unknown prefix 0x{prefix_value:08X}"))
        })?;
        let body = &bytes[4..];
        let hash = sha512_half(bytes);

        let node = match prefix {
            HashPrefix::InnerNode => {
                if body.len() != BRANCH_FACTOR * 32 {
                    return Err(SHAMapError::InvalidNode(format!(
                        "inner node body of {} bytes",
                        body.len()
                    )));
                }
                let mut inner = InnerNode::empty();
                for i in 0..BRANCH_FACTOR {
                    let mut child = [0u8; 32];
                    child.copy_from_slice(&body[i * 32..(i + 1) * 32]);
                    let child = Hash256(child);
                    if !child.is_zero() {
                        inner.children[i] = ChildSlot::Hash(child);
                    }
                }
                TreeNode::Inner(inner)
            }
            HashPrefix::TransactionId => {
                // The tag of a bare transaction leaf is its own hash.
                let item = SHAMapItem::new(hash, body.to_vec());
                TreeNode::Leaf(LeafNode::new(Arc::new(item), LeafType::Transaction))
            }
            HashPrefix::TxNode | HashPrefix::LeafNode => {
                if body.len() < 32 {
                    return Err(SHAMapError::InvalidNode("leaf shorter than a tag".into()));
                }
                let (data, tag_bytes) = body.split_at(body.len() - 32);
                let mut tag = [0u8; 32];
                tag.copy_from_slice(tag_bytes);
                let leaf_type = if prefix == HashPrefix::TxNode {
                    LeafType::TransactionWithMeta
                } else {
                    LeafType::State
                };
                let item = SHAMapItem::new(Hash256(tag), data.to_vec());
                TreeNode::Leaf(LeafNode::new(Arc::new(item), leaf_type))
            }
            other => {
                return Err(SHAMapError::InvalidNode(format!(
                    "prefix {other:?} is not a tree node"
                )))
            }
        };

        Ok(Self { hash, node })
    }
}
