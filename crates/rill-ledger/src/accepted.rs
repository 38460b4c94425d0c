//! Accepted-ledger projection.
//!
//! The flat view of a closed ledger's transactions that the header index
//! consumes: one record per transaction, in canonical (tag) order, with the
//! accounts its metadata says it touched.

use rill_common::{AccountId, Hash256};
use rill_protocol::{LedgerEntry, SerializerIterator};
use rill_shamap::LeafType;
use tracing::warn;

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::Result;

/// One transaction of an accepted ledger.
#[derive(Debug, Clone)]
pub struct AcceptedTx {
    /// The transaction id.
    pub hash: Hash256,
    /// The raw transaction blob.
    pub txn: Vec<u8>,
    /// The raw metadata blob, when stored with one.
    pub meta: Option<Vec<u8>>,
    /// Accounts the metadata reports as affected.
    pub affected: Vec<AccountId>,
    /// Position within the ledger.
    pub txn_seq: u32,
}

/// The ordered transaction list of a closed ledger.
#[derive(Debug, Clone)]
pub struct AcceptedLedger {
    pub ledger_hash: Hash256,
    pub sequence: u32,
    pub transactions: Vec<AcceptedTx>,
}

/// Pull the affected accounts out of a metadata blob.
///
/// Metadata is a field map like any entry; the accounts are whatever
/// account-valued fields it carries. A blob this layer cannot decode
/// contributes no accounts.
fn affected_accounts(tx_hash: &Hash256, meta: &[u8]) -> Vec<AccountId> {
    match LedgerEntry::from_bytes(meta, *tx_hash) {
        Ok(decoded) => decoded.account_fields(),
        Err(err) => {
            warn!(tx = %tx_hash, %err, "metadata not decodable, no affected accounts");
            Vec::new()
        }
    }
}

impl AcceptedLedger {
    /// Project a ledger's transaction tree. Fails with `MissingNode` when
    /// the tree is not fully resident.
    pub fn from_ledger(ledger: &Ledger) -> Result<Self> {
        let tx_map = ledger.tx_map();
        let mut transactions = Vec::new();
        let mut cursor = tx_map.peek_first_item()?;
        let mut txn_seq = 0u32;

        while let Some(item) = cursor {
            let tag = item.tag();
            let (_, leaf_type) = tx_map
                .peek_item_with_type(&tag)?
                .ok_or_else(|| LedgerError::Internal(format!("leaf {tag} vanished mid-walk")))?;

            let (txn, meta) = match leaf_type {
                LeafType::Transaction => (item.data().to_vec(), None),
                LeafType::TransactionWithMeta => {
                    let mut it = SerializerIterator::new(item.data());
                    let txn = it.get_vl()?;
                    let meta = it.get_vl()?;
                    (txn, Some(meta))
                }
                LeafType::State => {
                    return Err(LedgerError::Internal(
                        "state leaf in transaction tree".into(),
                    ))
                }
            };

            let affected = meta
                .as_deref()
                .map(|meta| affected_accounts(&tag, meta))
                .unwrap_or_default();
            if affected.is_empty() {
                warn!(
                    ledger = ledger.sequence(),
                    tx = %tag,
                    "transaction affects no accounts"
                );
            }

            transactions.push(AcceptedTx {
                hash: tag,
                txn,
                meta,
                affected,
                txn_seq,
            });
            txn_seq += 1;
            cursor = tx_map.peek_next_item(&tag)?;
        }

        Ok(Self {
            ledger_hash: ledger.hash(),
            sequence: ledger.sequence(),
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_protocol::{FieldId, LedgerEntryType};

    #[test]
    fn test_affected_accounts_from_field_map() {
        let tx_hash = Hash256::from_bytes([9; 32]);
        let mut meta = LedgerEntry::new(LedgerEntryType::AccountRoot, tx_hash);
        meta.set_account(FieldId::Account, AccountId::from_bytes([1; 20]));
        meta.set_account(FieldId::Owner, AccountId::from_bytes([2; 20]));
        let accounts = affected_accounts(&tx_hash, &meta.serialize().unwrap());
        assert_eq!(accounts.len(), 2);
        assert!(accounts.contains(&AccountId::from_bytes([1; 20])));
        assert!(accounts.contains(&AccountId::from_bytes([2; 20])));
    }

    #[test]
    fn test_undecodable_metadata_is_tolerated() {
        let tx_hash = Hash256::from_bytes([9; 32]);
        assert!(affected_accounts(&tx_hash, &[0xFF, 0xFF, 0xFF]).is_empty());
    }
}
