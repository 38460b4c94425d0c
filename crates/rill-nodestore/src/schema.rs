//! Header-index schema.
//!
//! Three tables: one row per finalised ledger header, one row per
//! transaction, and a join table mapping affected accounts to transactions.
//! Hashes are stored as uppercase hex; blobs as raw bytes.

use rusqlite::Connection;

use crate::Result;

/// Create the header-index tables if they do not exist.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS Ledgers (
            LedgerHash      TEXT PRIMARY KEY,
            LedgerSeq       INTEGER UNIQUE NOT NULL,
            PrevHash        TEXT NOT NULL,
            TotalCoins      INTEGER NOT NULL,
            ClosingTime     INTEGER NOT NULL,
            PrevClosingTime INTEGER NOT NULL,
            CloseTimeRes    INTEGER NOT NULL,
            CloseFlags      INTEGER NOT NULL,
            AccountSetHash  TEXT NOT NULL,
            TransSetHash    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS SeqLedger ON Ledgers(LedgerSeq);

        CREATE TABLE IF NOT EXISTS Transactions (
            TransID   TEXT PRIMARY KEY,
            LedgerSeq INTEGER NOT NULL,
            TxnSeq    INTEGER NOT NULL,
            Status    TEXT NOT NULL,
            RawTxn    BLOB NOT NULL,
            TxnMeta   BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS TxLgrIndex ON Transactions(LedgerSeq);

        CREATE TABLE IF NOT EXISTS AccountTransactions (
            TransID   TEXT NOT NULL,
            Account   TEXT NOT NULL,
            LedgerSeq INTEGER NOT NULL,
            TxnSeq    INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS AcctTxIndex
            ON AccountTransactions(Account, LedgerSeq);
        CREATE INDEX IF NOT EXISTS AcctTxLgrIndex
            ON AccountTransactions(LedgerSeq);
        "#,
    )?;
    Ok(())
}
