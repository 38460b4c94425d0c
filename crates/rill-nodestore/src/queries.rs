//! Header-index query implementations.
//!
//! Query traits are implemented on [`rusqlite::Connection`], so they work
//! both on pooled connections and inside transactions. All statements are
//! prepared; hashes travel as uppercase hex.

use std::collections::BTreeMap;

use rill_common::{AccountId, Hash256};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::Result;

/// One row of the `Ledgers` table: the indexed view of a ledger header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHeaderRow {
    pub ledger_hash: Hash256,
    pub ledger_seq: u32,
    pub prev_hash: Hash256,
    pub total_coins: u64,
    pub closing_time: u64,
    pub prev_closing_time: u64,
    pub close_time_res: u8,
    pub close_flags: u8,
    pub account_set_hash: Hash256,
    pub trans_set_hash: Hash256,
}

/// One row of the `Transactions` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRow {
    pub trans_id: Hash256,
    pub ledger_seq: u32,
    pub txn_seq: u32,
    pub status: String,
    pub raw_txn: Vec<u8>,
    pub txn_meta: Vec<u8>,
}

/// One row of the `AccountTransactions` join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTxRow {
    pub trans_id: Hash256,
    pub account: AccountId,
    pub ledger_seq: u32,
    pub txn_seq: u32,
}

fn parse_hash(hex: String) -> Result<Hash256> {
    Hash256::from_hex(&hex).map_err(|e| StoreError::Integrity(format!("bad stored hash: {e}")))
}

/// Query trait for ledger header rows.
pub trait HeaderIndexQueries {
    /// Insert or replace the row for a header.
    fn save_header(&self, row: &LedgerHeaderRow) -> Result<()>;

    /// Delete any row with the given sequence. Returns whether one existed.
    fn delete_header_by_seq(&self, seq: u32) -> Result<bool>;

    /// Load the row for a sequence.
    fn load_header_by_seq(&self, seq: u32) -> Result<Option<LedgerHeaderRow>>;

    /// Load the row for a ledger hash.
    fn load_header_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeaderRow>>;

    /// The row with the highest sequence.
    fn latest_header(&self) -> Result<Option<LedgerHeaderRow>>;

    /// The ledger hash at a sequence.
    fn hash_by_index(&self, seq: u32) -> Result<Option<Hash256>>;

    /// The ledger hash and parent hash at a sequence.
    fn hashes_by_index(&self, seq: u32) -> Result<Option<(Hash256, Hash256)>>;

    /// Ledger and parent hashes for every stored sequence in
    /// `[min_seq, max_seq]`.
    fn hashes_by_index_range(
        &self,
        min_seq: u32,
        max_seq: u32,
    ) -> Result<BTreeMap<u32, (Hash256, Hash256)>>;
}

const HEADER_COLUMNS: &str = "LedgerHash, LedgerSeq, PrevHash, TotalCoins, ClosingTime, \
     PrevClosingTime, CloseTimeRes, CloseFlags, AccountSetHash, TransSetHash";

fn row_to_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, u32, String, i64, i64, i64, u8, u8, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn build_header(
    raw: (String, u32, String, i64, i64, i64, u8, u8, String, String),
) -> Result<LedgerHeaderRow> {
    Ok(LedgerHeaderRow {
        ledger_hash: parse_hash(raw.0)?,
        ledger_seq: raw.1,
        prev_hash: parse_hash(raw.2)?,
        total_coins: raw.3 as u64,
        closing_time: raw.4 as u64,
        prev_closing_time: raw.5 as u64,
        close_time_res: raw.6,
        close_flags: raw.7,
        account_set_hash: parse_hash(raw.8)?,
        trans_set_hash: parse_hash(raw.9)?,
    })
}

impl HeaderIndexQueries for Connection {
    fn save_header(&self, row: &LedgerHeaderRow) -> Result<()> {
        self.execute(
            r#"
            INSERT OR REPLACE INTO Ledgers
            (LedgerHash, LedgerSeq, PrevHash, TotalCoins, ClosingTime,
             PrevClosingTime, CloseTimeRes, CloseFlags, AccountSetHash, TransSetHash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                row.ledger_hash.to_hex(),
                row.ledger_seq,
                row.prev_hash.to_hex(),
                row.total_coins as i64,
                row.closing_time as i64,
                row.prev_closing_time as i64,
                row.close_time_res,
                row.close_flags,
                row.account_set_hash.to_hex(),
                row.trans_set_hash.to_hex(),
            ],
        )?;
        Ok(())
    }

    fn delete_header_by_seq(&self, seq: u32) -> Result<bool> {
        let deleted = self.execute("DELETE FROM Ledgers WHERE LedgerSeq = ?1", params![seq])?;
        Ok(deleted > 0)
    }

    fn load_header_by_seq(&self, seq: u32) -> Result<Option<LedgerHeaderRow>> {
        let raw = self
            .query_row(
                &format!("SELECT {HEADER_COLUMNS} FROM Ledgers WHERE LedgerSeq = ?1"),
                params![seq],
                row_to_header,
            )
            .optional()?;
        raw.map(build_header).transpose()
    }

    fn load_header_by_hash(&self, hash: &Hash256) -> Result<Option<LedgerHeaderRow>> {
        let raw = self
            .query_row(
                &format!("SELECT {HEADER_COLUMNS} FROM Ledgers WHERE LedgerHash = ?1"),
                params![hash.to_hex()],
                row_to_header,
            )
            .optional()?;
        raw.map(build_header).transpose()
    }

    fn latest_header(&self) -> Result<Option<LedgerHeaderRow>> {
        let raw = self
            .query_row(
                &format!(
                    "SELECT {HEADER_COLUMNS} FROM Ledgers ORDER BY LedgerSeq DESC LIMIT 1"
                ),
                [],
                row_to_header,
            )
            .optional()?;
        raw.map(build_header).transpose()
    }

    fn hash_by_index(&self, seq: u32) -> Result<Option<Hash256>> {
        let hex: Option<String> = self
            .query_row(
                "SELECT LedgerHash FROM Ledgers WHERE LedgerSeq = ?1",
                params![seq],
                |row| row.get(0),
            )
            .optional()?;
        hex.map(parse_hash).transpose()
    }

    fn hashes_by_index(&self, seq: u32) -> Result<Option<(Hash256, Hash256)>> {
        let raw: Option<(String, String)> = self
            .query_row(
                "SELECT LedgerHash, PrevHash FROM Ledgers WHERE LedgerSeq = ?1",
                params![seq],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        raw.map(|(h, p)| Ok((parse_hash(h)?, parse_hash(p)?)))
            .transpose()
    }

    fn hashes_by_index_range(
        &self,
        min_seq: u32,
        max_seq: u32,
    ) -> Result<BTreeMap<u32, (Hash256, Hash256)>> {
        let mut stmt = self.prepare(
            "SELECT LedgerSeq, LedgerHash, PrevHash FROM Ledgers \
             WHERE LedgerSeq >= ?1 AND LedgerSeq <= ?2 ORDER BY LedgerSeq ASC",
        )?;
        let rows = stmt.query_map(params![min_seq, max_seq], |row| {
            let seq: u32 = row.get(0)?;
            let hash: String = row.get(1)?;
            let prev: String = row.get(2)?;
            Ok((seq, hash, prev))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (seq, hash, prev) = row?;
            out.insert(seq, (parse_hash(hash)?, parse_hash(prev)?));
        }
        Ok(out)
    }
}

/// Query trait for transaction index rows.
pub trait TxIndexQueries {
    /// Delete all transaction rows for a ledger sequence.
    fn delete_transactions_for_seq(&self, seq: u32) -> Result<()>;

    /// Delete all account-transaction rows for a ledger sequence.
    fn delete_account_tx_for_seq(&self, seq: u32) -> Result<()>;

    /// Delete the account-transaction rows of one transaction.
    fn delete_account_tx_for_trans(&self, trans_id: &Hash256) -> Result<()>;

    /// Insert or replace one transaction row.
    fn insert_transaction(&self, row: &TxRow) -> Result<()>;

    /// Insert one account-transaction row.
    fn insert_account_tx(&self, row: &AccountTxRow) -> Result<()>;

    /// Every transaction row for a ledger sequence, ordered by position.
    fn transactions_for_seq(&self, seq: u32) -> Result<Vec<TxRow>>;

    /// Every transaction id that touched `account`, newest ledger first.
    fn transactions_for_account(&self, account: &AccountId) -> Result<Vec<AccountTxRow>>;
}

impl TxIndexQueries for Connection {
    fn delete_transactions_for_seq(&self, seq: u32) -> Result<()> {
        self.execute(
            "DELETE FROM Transactions WHERE LedgerSeq = ?1",
            params![seq],
        )?;
        Ok(())
    }

    fn delete_account_tx_for_seq(&self, seq: u32) -> Result<()> {
        self.execute(
            "DELETE FROM AccountTransactions WHERE LedgerSeq = ?1",
            params![seq],
        )?;
        Ok(())
    }

    fn delete_account_tx_for_trans(&self, trans_id: &Hash256) -> Result<()> {
        self.execute(
            "DELETE FROM AccountTransactions WHERE TransID = ?1",
            params![trans_id.to_hex()],
        )?;
        Ok(())
    }

    fn insert_transaction(&self, row: &TxRow) -> Result<()> {
        self.execute(
            r#"
            INSERT OR REPLACE INTO Transactions
            (TransID, LedgerSeq, TxnSeq, Status, RawTxn, TxnMeta)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                row.trans_id.to_hex(),
                row.ledger_seq,
                row.txn_seq,
                row.status,
                row.raw_txn,
                row.txn_meta,
            ],
        )?;
        Ok(())
    }

    fn insert_account_tx(&self, row: &AccountTxRow) -> Result<()> {
        self.execute(
            r#"
            INSERT INTO AccountTransactions (TransID, Account, LedgerSeq, TxnSeq)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                row.trans_id.to_hex(),
                row.account.to_hex(),
                row.ledger_seq,
                row.txn_seq,
            ],
        )?;
        Ok(())
    }

    fn transactions_for_seq(&self, seq: u32) -> Result<Vec<TxRow>> {
        let mut stmt = self.prepare(
            "SELECT TransID, LedgerSeq, TxnSeq, Status, RawTxn, TxnMeta \
             FROM Transactions WHERE LedgerSeq = ?1 ORDER BY TxnSeq ASC",
        )?;
        let rows = stmt.query_map(params![seq], |row| {
            let trans_id: String = row.get(0)?;
            Ok((
                trans_id,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (trans_id, ledger_seq, txn_seq, status, raw_txn, txn_meta) = row?;
            out.push(TxRow {
                trans_id: parse_hash(trans_id)?,
                ledger_seq,
                txn_seq,
                status,
                raw_txn,
                txn_meta,
            });
        }
        Ok(out)
    }

    fn transactions_for_account(&self, account: &AccountId) -> Result<Vec<AccountTxRow>> {
        let mut stmt = self.prepare(
            "SELECT TransID, Account, LedgerSeq, TxnSeq FROM AccountTransactions \
             WHERE Account = ?1 ORDER BY LedgerSeq DESC, TxnSeq DESC",
        )?;
        let rows = stmt.query_map(params![account.to_hex()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (trans_id, account_hex, ledger_seq, txn_seq) = row?;
            out.push(AccountTxRow {
                trans_id: parse_hash(trans_id)?,
                account: AccountId::from_hex(&account_hex)
                    .map_err(|e| StoreError::Integrity(format!("bad stored account: {e}")))?,
                ledger_seq,
                txn_seq,
            });
        }
        Ok(out)
    }
}
