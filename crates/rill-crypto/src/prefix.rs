//! Domain-separating hash prefixes.
//!
//! Every authenticated digest is computed over a 4-byte big-endian prefix
//! followed by the body, so a transaction id can never collide with, say, an
//! inner tree node. The numeric values are part of the wire contract: node
//! stores written by other implementations of this protocol use the same
//! constants, and they must never change.

/// The hash-domain prefix, one per object kind.
///
/// Each value spells a three-character mnemonic in its top three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HashPrefix {
    /// Transaction id and transaction leaf without metadata (`TXN`).
    TransactionId = 0x5458_4E00,
    /// Transaction leaf with metadata (`SND`).
    TxNode = 0x534E_4400,
    /// Account-state leaf node (`MLN`).
    LeafNode = 0x4D4C_4E00,
    /// Inner tree node (`MIN`).
    InnerNode = 0x4D49_4E00,
    /// Ledger header (`LWR`).
    LedgerMaster = 0x4C57_5200,
    /// Inner transaction signature (`STX`).
    TxSign = 0x5354_5800,
    /// Validation message (`VAL`).
    Validation = 0x5641_4C00,
    /// Consensus proposal (`PRP`).
    Proposal = 0x5052_5000,
}

impl HashPrefix {
    /// The prefix as it appears on the wire.
    pub fn to_be_bytes(self) -> [u8; 4] {
        (self as u32).to_be_bytes()
    }

    /// Decode a prefix from its wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x5458_4E00 => Some(Self::TransactionId),
            0x534E_4400 => Some(Self::TxNode),
            0x4D4C_4E00 => Some(Self::LeafNode),
            0x4D49_4E00 => Some(Self::InnerNode),
            0x4C57_5200 => Some(Self::LedgerMaster),
            0x5354_5800 => Some(Self::TxSign),
            0x5641_4C00 => Some(Self::Validation),
            0x5052_5000 => Some(Self::Proposal),
            _ => None,
        }
    }
}
