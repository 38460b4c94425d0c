//! Tree items.

use rill_common::Hash256;

/// A leaf payload: a 256-bit tag and an opaque value.
///
/// The tag decides where the item lives in the tree; the value's meaning
/// belongs to the layer above (a serialised ledger entry in the state tree,
/// a transaction blob in the transaction tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SHAMapItem {
    tag: Hash256,
    data: Vec<u8>,
}

impl SHAMapItem {
    pub fn new(tag: Hash256, data: Vec<u8>) -> Self {
        Self { tag, data }
    }

    pub fn tag(&self) -> Hash256 {
        self.tag
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_accessors() {
        let item = SHAMapItem::new(Hash256::from_bytes([1; 32]), vec![1, 2, 3]);
        assert_eq!(item.tag(), Hash256::from_bytes([1; 32]));
        assert_eq!(item.data(), &[1, 2, 3]);
        assert_eq!(item.into_data(), vec![1, 2, 3]);
    }
}
