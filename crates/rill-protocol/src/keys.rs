//! Key derivation.
//!
//! Every conceptual object in the state tree lives at a deterministic
//! 256-bit key: `sha512_half(space_tag_be16 || args)`. The space tags are
//! part of the wire contract; two implementations deriving different keys
//! for the same object would disagree on every state root.

use rill_common::{AccountId, Currency, Hash256};

use crate::serializer::Serializer;

/// Key-space tags.
///
/// Each tag is the ASCII code of its mnemonic character, widened to 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SpaceTag {
    /// Account root entries (`a`).
    Account = 0x0061,
    /// Directory pages past the root (`d`).
    DirNode = 0x0064,
    /// Generator maps (`g`).
    Generator = 0x0067,
    /// Trust lines (`r`).
    RippleState = 0x0072,
    /// Offers (`o`).
    Offer = 0x006F,
    /// Owner directory roots (`O`).
    OwnerDir = 0x004F,
    /// Order book directory bases (`B`).
    BookDir = 0x0042,
    /// Historical-hash skiplists (`s`).
    SkipList = 0x0073,
    /// Amendment table (`f`).
    Amendment = 0x0066,
    /// Fee schedule (`e`).
    Fee = 0x0065,
    /// Tickets (`T`).
    Ticket = 0x0054,
}

/// One side of an order book: a currency and its issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Issue {
    pub currency: Currency,
    pub issuer: AccountId,
}

/// An order book, identified by what the taker pays and gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Book {
    pub input: Issue,
    pub output: Issue,
}

/// Key of an account's root entry.
pub fn account_root_key(account: &AccountId) -> Hash256 {
    let mut s = Serializer::with_capacity(22);
    s.add16(SpaceTag::Account as u16);
    s.add160(account.as_bytes());
    s.sha512_half()
}

/// Key of the root page of an account's owner directory.
pub fn owner_dir_key(account: &AccountId) -> Hash256 {
    let mut s = Serializer::with_capacity(22);
    s.add16(SpaceTag::OwnerDir as u16);
    s.add160(account.as_bytes());
    s.sha512_half()
}

/// Key of directory page `page` under the root page keyed `root`.
///
/// Page zero is the root itself.
pub fn dir_node_key(root: &Hash256, page: u64) -> Hash256 {
    if page == 0 {
        return *root;
    }
    let mut s = Serializer::with_capacity(42);
    s.add16(SpaceTag::DirNode as u16);
    s.add256(root);
    s.add64(page);
    s.sha512_half()
}

/// Key of the offer created by `account` at transaction sequence `sequence`.
pub fn offer_key(account: &AccountId, sequence: u32) -> Hash256 {
    let mut s = Serializer::with_capacity(26);
    s.add16(SpaceTag::Offer as u16);
    s.add160(account.as_bytes());
    s.add32(sequence);
    s.sha512_half()
}

/// Key of the trust line between `a` and `b` in `currency`.
///
/// The two accounts are sorted so the key is independent of argument order.
pub fn ripple_state_key(a: &AccountId, b: &AccountId, currency: &Currency) -> Hash256 {
    let mut s = Serializer::with_capacity(62);
    s.add16(SpaceTag::RippleState as u16);
    if a < b {
        s.add160(a.as_bytes());
        s.add160(b.as_bytes());
    } else {
        s.add160(b.as_bytes());
        s.add160(a.as_bytes());
    }
    s.add160(currency.as_bytes());
    s.sha512_half()
}

/// Key of the ticket created by `account` at sequence `sequence`.
pub fn ticket_key(account: &AccountId, sequence: u32) -> Hash256 {
    let mut s = Serializer::with_capacity(26);
    s.add16(SpaceTag::Ticket as u16);
    s.add160(account.as_bytes());
    s.add32(sequence);
    s.sha512_half()
}

/// Key of the generator map for `generator`.
pub fn generator_key(generator: &AccountId) -> Hash256 {
    let mut s = Serializer::with_capacity(22);
    s.add16(SpaceTag::Generator as u16);
    s.add160(generator.as_bytes());
    s.sha512_half()
}

/// Key of the fee-schedule entry.
pub fn fee_settings_key() -> Hash256 {
    let mut s = Serializer::with_capacity(2);
    s.add16(SpaceTag::Fee as u16);
    s.sha512_half()
}

/// Key of the amendment table.
pub fn amendments_key() -> Hash256 {
    let mut s = Serializer::with_capacity(2);
    s.add16(SpaceTag::Amendment as u16);
    s.sha512_half()
}

/// Key of the sliding skiplist recording the last 256 ledger hashes.
pub fn skiplist_key() -> Hash256 {
    let mut s = Serializer::with_capacity(2);
    s.add16(SpaceTag::SkipList as u16);
    s.sha512_half()
}

/// Key of the paged skiplist covering ledger sequence `seq`.
///
/// Pages span 65536 sequences; every page holds the hashes of the 256
/// multiples of 256 inside its span.
pub fn skiplist_key_for(seq: u32) -> Hash256 {
    let mut s = Serializer::with_capacity(6);
    s.add16(SpaceTag::SkipList as u16);
    s.add32(seq >> 16);
    s.sha512_half()
}

/// Base key of an order book: the quality-zero key its pages ascend from.
pub fn book_base_key(book: &Book) -> Hash256 {
    let mut s = Serializer::with_capacity(82);
    s.add16(SpaceTag::BookDir as u16);
    s.add160(book.input.currency.as_bytes());
    s.add160(book.output.currency.as_bytes());
    s.add160(book.input.issuer.as_bytes());
    s.add160(book.output.issuer.as_bytes());
    quality_index(&s.sha512_half(), 0)
}

/// `base` with its low 64 bits replaced by `quality` (big-endian), so that
/// key order equals exchange-rate order within a book.
pub fn quality_index(base: &Hash256, quality: u64) -> Hash256 {
    base.with_low_u64(quality)
}

/// The quality encoded in the low 64 bits of `key`.
pub fn quality_from_key(key: &Hash256) -> u64 {
    key.low_u64()
}

/// The first key past every quality of `base`'s book: `base + 2^64`.
pub fn quality_next_key(base: &Hash256) -> Hash256 {
    let mut bytes = *base.as_bytes();
    for i in (0..24).rev() {
        let (sum, carry) = bytes[i].overflowing_add(1);
        bytes[i] = sum;
        if !carry {
            break;
        }
    }
    Hash256::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8) -> AccountId {
        AccountId::from_bytes([byte; 20])
    }

    #[test]
    fn test_space_tags_are_mnemonic() {
        assert_eq!(SpaceTag::Account as u16, u16::from(b'a'));
        assert_eq!(SpaceTag::OwnerDir as u16, u16::from(b'O'));
        assert_eq!(SpaceTag::BookDir as u16, u16::from(b'B'));
        assert_eq!(SpaceTag::SkipList as u16, u16::from(b's'));
        assert_eq!(SpaceTag::Fee as u16, u16::from(b'e'));
        assert_eq!(SpaceTag::Ticket as u16, u16::from(b'T'));
    }

    #[test]
    fn test_ripple_state_key_symmetry() {
        let a = account(1);
        let b = account(2);
        let ccy = Currency::from_bytes([9; 20]);
        assert_eq!(ripple_state_key(&a, &b, &ccy), ripple_state_key(&b, &a, &ccy));
        assert_ne!(
            ripple_state_key(&a, &b, &ccy),
            ripple_state_key(&a, &b, &Currency::from_bytes([8; 20]))
        );
    }

    #[test]
    fn test_dir_node_key_page_zero_is_root() {
        let root = account_root_key(&account(3));
        assert_eq!(dir_node_key(&root, 0), root);
        assert_ne!(dir_node_key(&root, 1), root);
        assert_ne!(dir_node_key(&root, 1), dir_node_key(&root, 2));
    }

    #[test]
    fn test_quality_roundtrip() {
        let base = Hash256::from_hex(
            "D2DC44E5DC189318DB36EF87D2104CDF0A0FE3A4B698BEEE55038D7EA4C68000",
        )
        .unwrap();
        assert_eq!(quality_from_key(&base), 6125895493223874560);

        let zeroed = quality_index(&base, 0);
        let q42 = quality_index(&zeroed, 42);
        assert_eq!(quality_from_key(&q42), 42);
        assert_eq!(&q42.as_bytes()[..24], &base.as_bytes()[..24]);
    }

    #[test]
    fn test_quality_order_is_key_order() {
        let base = quality_index(&account_root_key(&account(4)), 0);
        let lo = quality_index(&base, 100);
        let hi = quality_index(&base, 200);
        assert!(lo < hi);
    }

    #[test]
    fn test_quality_next_key() {
        let base = quality_index(&account_root_key(&account(5)), 7);
        let next = quality_next_key(&base);
        // The low 64 bits are untouched; the upper 192 bits gained one.
        assert_eq!(next.low_u64(), 7);
        assert!(next > base);
        assert_eq!(next.as_bytes()[23], base.as_bytes()[23].wrapping_add(1));
    }

    #[test]
    fn test_skiplist_pages() {
        // All sequences below 65536 share one page.
        assert_eq!(skiplist_key_for(0), skiplist_key_for(65535));
        assert_ne!(skiplist_key_for(0), skiplist_key_for(65536));
        // The paged key differs from the sliding key.
        assert_ne!(skiplist_key(), skiplist_key_for(0));
    }

    #[test]
    fn test_offer_and_ticket_keys_disjoint() {
        let a = account(6);
        assert_ne!(offer_key(&a, 1), ticket_key(&a, 1));
        assert_ne!(offer_key(&a, 1), offer_key(&a, 2));
    }

    #[test]
    fn test_book_base_has_zero_quality() {
        let book = Book {
            input: Issue {
                currency: Currency::from_bytes([1; 20]),
                issuer: account(1),
            },
            output: Issue {
                currency: Currency::from_bytes([2; 20]),
                issuer: account(2),
            },
        };
        let base = book_base_key(&book);
        assert_eq!(quality_from_key(&base), 0);
    }
}
