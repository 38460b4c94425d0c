//! The validated-ledger save pipeline.
//!
//! Saving is arranged, not done: [`pend_save_validated`] flags the ledger,
//! registers the sequence as in flight, and either saves inline or hands
//! the work to the background queue (current ledgers ahead of old ones).
//! [`save_validated_ledger`] writes the header to the node store and
//! rewrites the header-index rows for the sequence transactionally.

use std::sync::Arc;

use rill_nodestore::{
    AccountTxRow, HeaderIndexQueries, LedgerHeaderRow, NodeKind, TxIndexQueries, TxRow,
};
use rill_work::JobType;
use tracing::{debug, error, trace, warn};

use crate::accepted::AcceptedLedger;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::Result;

/// Status column value for transactions of an accepted ledger.
const TX_STATUS_ACCEPTED: &str = "A";

/// Arrange to save a validated ledger. Idempotent per ledger hash; returns
/// `false` only when the save could not even be arranged.
pub fn pend_save_validated(ledger: &Arc<Ledger>, is_synchronous: bool, is_current: bool) -> bool {
    let ctx = ledger.context();

    if !ctx.mark_saved(ledger.hash()) {
        debug!(sequence = ledger.sequence(), "double pend-save");
        return true;
    }

    if !ledger.is_immutable() {
        error!(
            sequence = ledger.sequence(),
            "pend-save of a mutable ledger"
        );
        return false;
    }

    if !ctx.register_pending_save(ledger.sequence()) {
        debug!(
            sequence = ledger.sequence(),
            "pend-save with sequence already in flight"
        );
        return true;
    }

    if is_synchronous {
        return match save_validated_ledger(ledger, is_current) {
            Ok(saved) => saved,
            Err(err) => {
                error!(sequence = ledger.sequence(), %err, "synchronous save failed");
                false
            }
        };
    }

    let job_type = if is_current {
        JobType::SaveCurrent
    } else {
        JobType::SaveOld
    };
    let job_ledger = Arc::clone(ledger);
    let queued = ctx.job_queue().add_job(job_type, "ledger-save", move |job| {
        if job.is_stopped() {
            debug!(
                sequence = job_ledger.sequence(),
                "save skipped, engine stopped"
            );
            job_ledger
                .context()
                .retire_pending_save(job_ledger.sequence());
            return;
        }
        if let Err(err) = save_validated_ledger(&job_ledger, is_current) {
            error!(sequence = job_ledger.sequence(), %err, "background save failed");
        }
    });
    if !queued {
        ctx.retire_pending_save(ledger.sequence());
        return false;
    }
    true
}

/// Persist a validated ledger now. Returns `Ok(false)` when the ledger's
/// transactions are not fully resident (the pending entry is retired and
/// the caller's acquisition layer may retry from peers).
pub fn save_validated_ledger(ledger: &Ledger, is_current: bool) -> Result<bool> {
    let ctx = ledger.context();
    let sequence = ledger.sequence();
    trace!(sequence, is_current, "saving validated ledger");

    if ledger.state_root().is_zero() {
        error!(sequence, "state root is zero");
        ctx.retire_pending_save(sequence);
        return Err(LedgerError::Internal("state root is zero".into()));
    }
    if !ledger.assert_sane() {
        ctx.retire_pending_save(sequence);
        return Err(LedgerError::Internal(
            "header roots disagree with live maps".into(),
        ));
    }

    // The header itself is content-addressed like every other node.
    let header = ledger.header();
    ctx.node_store().put(
        NodeKind::Ledger,
        sequence,
        header.to_prefixed_bytes(),
        ledger.hash(),
    );

    let accepted = match AcceptedLedger::from_ledger(ledger) {
        Ok(accepted) => accepted,
        Err(err) => {
            warn!(sequence, %err, "accepted ledger was missing nodes");
            ctx.retire_pending_save(sequence);
            return Ok(false);
        }
    };

    let row = LedgerHeaderRow {
        ledger_hash: ledger.hash(),
        ledger_seq: sequence,
        prev_hash: header.parent_hash,
        total_coins: header.total_coins,
        closing_time: u64::from(header.close_time),
        prev_closing_time: u64::from(header.parent_close_time),
        close_time_res: header.close_resolution,
        close_flags: header.close_flags,
        account_set_hash: header.state_root,
        trans_set_hash: header.tx_root,
    };

    let result = ctx.header_index().transaction(|db| {
        db.delete_header_by_seq(sequence)?;
        db.delete_transactions_for_seq(sequence)?;
        db.delete_account_tx_for_seq(sequence)?;

        for tx in &accepted.transactions {
            db.delete_account_tx_for_trans(&tx.hash)?;
            for account in &tx.affected {
                db.insert_account_tx(&AccountTxRow {
                    trans_id: tx.hash,
                    account: *account,
                    ledger_seq: sequence,
                    txn_seq: tx.txn_seq,
                })?;
            }
            db.insert_transaction(&TxRow {
                trans_id: tx.hash,
                ledger_seq: sequence,
                txn_seq: tx.txn_seq,
                status: TX_STATUS_ACCEPTED.to_string(),
                raw_txn: tx.txn.clone(),
                txn_meta: tx.meta.clone().unwrap_or_default(),
            })?;
        }

        db.save_header(&row)?;
        Ok(())
    });

    if let Err(err) = result {
        error!(sequence, %err, "header index rewrite failed");
        ctx.retire_pending_save(sequence);
        return Err(err.into());
    }

    ctx.retire_pending_save(sequence);
    Ok(true)
}
