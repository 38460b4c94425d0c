//! Ledger headers.
//!
//! The header body is a fixed 118-byte big-endian layout; with its
//! domain prefix it is 122 bytes, and the ledger hash is the half-SHA-512
//! of the prefixed form. The layout is wire contract and must match every
//! other implementation byte for byte.

use rill_common::Hash256;
use rill_crypto::HashPrefix;
use rill_protocol::{ProtocolError, Serializer, SerializerIterator};

/// Size of the header body without the prefix.
pub const HEADER_BODY_SIZE: usize = 118;

/// Close-flag bit: the close time is an estimate, skip rounding on accept.
pub const CLOSE_FLAG_NO_CONSENSUS_TIME: u8 = 1;

/// A ledger header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedgerHeader {
    /// Ledger sequence number; the genesis ledger is 1.
    pub sequence: u32,
    /// Total coins in existence, in drops.
    pub total_coins: u64,
    /// Hash of the parent ledger; zero for genesis.
    pub parent_hash: Hash256,
    /// Root hash of the transaction tree.
    pub tx_root: Hash256,
    /// Root hash of the account-state tree.
    pub state_root: Hash256,
    /// When the parent ledger closed.
    pub parent_close_time: u32,
    /// When this ledger closed.
    pub close_time: u32,
    /// Close-time resolution in seconds.
    pub close_resolution: u8,
    /// Close flags; see [`CLOSE_FLAG_NO_CONSENSUS_TIME`].
    pub close_flags: u8,
}

impl LedgerHeader {
    /// Append the fixed-layout body.
    pub fn add_raw(&self, s: &mut Serializer) {
        s.add32(self.sequence);
        s.add64(self.total_coins);
        s.add256(&self.parent_hash);
        s.add256(&self.tx_root);
        s.add256(&self.state_root);
        s.add32(self.parent_close_time);
        s.add32(self.close_time);
        s.add8(self.close_resolution);
        s.add8(self.close_flags);
    }

    /// The body bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut s = Serializer::with_capacity(HEADER_BODY_SIZE);
        self.add_raw(&mut s);
        s.into_bytes()
    }

    /// The prefixed form: the `LedgerMaster` tag followed by the body.
    pub fn to_prefixed_bytes(&self) -> Vec<u8> {
        let mut s = Serializer::with_capacity(HEADER_BODY_SIZE + 4);
        s.add_prefix(HashPrefix::LedgerMaster);
        self.add_raw(&mut s);
        s.into_bytes()
    }

    /// Read a header, skipping the 4-byte prefix when present.
    pub fn set_raw(data: &[u8], has_prefix: bool) -> Result<Self, ProtocolError> {
        let mut it = SerializerIterator::new(data);
        if has_prefix {
            it.get32()?;
        }
        Ok(Self {
            sequence: it.get32()?,
            total_coins: it.get64()?,
            parent_hash: it.get256()?,
            tx_root: it.get256()?,
            state_root: it.get256()?,
            parent_close_time: it.get32()?,
            close_time: it.get32()?,
            close_resolution: it.get8()?,
            close_flags: it.get8()?,
        })
    }

    /// The ledger hash: `sha512_half(LedgerMaster || body)`.
    pub fn compute_hash(&self) -> Hash256 {
        let mut s = Serializer::with_capacity(HEADER_BODY_SIZE + 4);
        s.add_prefix(HashPrefix::LedgerMaster);
        self.add_raw(&mut s);
        s.sha512_half()
    }

    /// Whether the close time carries network consensus.
    pub fn close_agree(&self) -> bool {
        self.close_flags & CLOSE_FLAG_NO_CONSENSUS_TIME == 0
    }
}
