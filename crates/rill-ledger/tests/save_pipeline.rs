//! Persistence integration tests: the pend/save pipeline, header-index
//! round-trips and reloading ledgers from storage.

use std::sync::Arc;

use rill_common::{AccountId, Hash256, LedgerConfig, ManualClock};
use rill_crypto::sha512_half;
use rill_ledger::{
    pend_save_validated, save_validated_ledger, Ledger, LedgerContext, LedgerStateParms,
};
use rill_nodestore::{
    Database, HeaderIndexQueries, MemoryNodeStore, NodeStore, TxIndexQueries,
};
use rill_protocol::keys;
use rill_protocol::{FieldId, LedgerEntry, LedgerEntryType};

fn test_context() -> Arc<LedgerContext> {
    LedgerContext::new(
        LedgerConfig::standalone_for_test(),
        Arc::new(MemoryNodeStore::new()),
        Database::open_in_memory().unwrap(),
        Arc::new(ManualClock::new(1_000_000)),
    )
}

fn master_account() -> AccountId {
    let mut bytes = [0u8; 20];
    bytes[19] = 1;
    AccountId::from_bytes(bytes)
}

fn accepted_genesis(ctx: &Arc<LedgerContext>) -> Ledger {
    let mut ledger = Ledger::new_genesis(Arc::clone(ctx), master_account(), 100000).unwrap();
    ledger.set_closed();
    ledger.set_accepted();
    ledger
}

/// Metadata blob naming the accounts a transaction touched.
fn meta_blob(tx_hash: Hash256, accounts: &[AccountId]) -> Vec<u8> {
    let mut meta = LedgerEntry::new(LedgerEntryType::AccountRoot, tx_hash);
    if let Some(first) = accounts.first() {
        meta.set_account(FieldId::Account, *first);
    }
    if let Some(second) = accounts.get(1) {
        meta.set_account(FieldId::Owner, *second);
    }
    meta.serialize().unwrap()
}

#[test]
fn test_synchronous_save_and_reload() {
    let ctx = test_context();
    let mut ledger = accepted_genesis(&ctx);
    ledger.set_validated();
    let hash = ledger.hash();
    let ledger = Arc::new(ledger);

    assert!(pend_save_validated(&ledger, true, true));
    assert!(ctx.pending_saves().is_empty());

    // Header row landed.
    let row = ctx
        .header_index()
        .with_connection(|conn| conn.load_header_by_seq(1))
        .unwrap()
        .unwrap();
    assert_eq!(row.ledger_hash, hash);
    assert_eq!(row.account_set_hash, ledger.state_root());

    // The header blob is in the node store under the ledger hash.
    let stored = ctx.node_store().get(&hash).unwrap();
    assert_eq!(sha512_half(&stored), hash);

    // Reload by index and by hash; both verify against the stored hash.
    let by_index = Ledger::load_by_index(&ctx, 1).unwrap().unwrap();
    assert_eq!(by_index.hash(), hash);
    assert!(by_index.is_loaded());
    assert!(by_index.is_closed());
    assert!(by_index.has_account(&master_account()).unwrap());

    let by_hash = Ledger::load_by_hash(&ctx, &hash).unwrap().unwrap();
    assert_eq!(by_hash.hash(), hash);

    let latest = Ledger::load_latest(&ctx).unwrap().unwrap();
    assert_eq!(latest.sequence(), 1);
}

#[test]
fn test_pend_save_is_idempotent() {
    let ctx = test_context();
    let mut ledger = accepted_genesis(&ctx);
    ledger.set_validated();
    let ledger = Arc::new(ledger);

    assert!(pend_save_validated(&ledger, true, true));
    // Second call short-circuits on the saved flag.
    assert!(pend_save_validated(&ledger, true, true));

    let count: i64 = ctx
        .header_index()
        .with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM Ledgers", [], |row| row.get(0))
                .map_err(rill_nodestore::StoreError::from)
        })
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_background_save_drains() {
    let ctx = test_context();
    let mut ledger = accepted_genesis(&ctx);
    ledger.set_validated();
    let ledger = Arc::new(ledger);

    assert!(pend_save_validated(&ledger, false, true));
    ctx.job_queue().wait_idle();

    assert!(ctx.pending_saves().is_empty());
    assert!(Ledger::load_by_index(&ctx, 1).unwrap().is_some());
}

#[test]
fn test_save_records_transactions_and_accounts() {
    let ctx = test_context();
    let genesis = accepted_genesis(&ctx);

    let mut next = Ledger::new_following(&genesis).unwrap();
    let alice = AccountId::from_bytes([0xA1; 20]);
    let bob = AccountId::from_bytes([0xB2; 20]);

    let txn1 = vec![1, 2, 3, 4];
    let tx1 = sha512_half(&txn1);
    next.add_transaction_with_meta(tx1, &txn1, &meta_blob(tx1, &[alice, bob]))
        .unwrap();

    let txn2 = vec![5, 6, 7];
    let tx2 = sha512_half(&txn2);
    next.add_transaction_with_meta(tx2, &txn2, &meta_blob(tx2, &[alice]))
        .unwrap();

    next.set_closed();
    next.set_accepted();
    next.set_validated();
    let sequence = next.sequence();
    let next = Arc::new(next);

    assert!(pend_save_validated(&next, true, true));

    let tx_rows = ctx
        .header_index()
        .with_connection(|conn| conn.transactions_for_seq(sequence))
        .unwrap();
    assert_eq!(tx_rows.len(), 2);
    for row in &tx_rows {
        assert_eq!(row.status, "A");
        assert!(row.trans_id == tx1 || row.trans_id == tx2);
    }

    let alice_rows = ctx
        .header_index()
        .with_connection(|conn| conn.transactions_for_account(&alice))
        .unwrap();
    assert_eq!(alice_rows.len(), 2);

    let bob_rows = ctx
        .header_index()
        .with_connection(|conn| conn.transactions_for_account(&bob))
        .unwrap();
    assert_eq!(bob_rows.len(), 1);
    assert_eq!(bob_rows[0].trans_id, tx1);

    // Saving the same sequence again (a replacement ledger) rewrites the
    // rows instead of duplicating them.
    assert!(save_validated_ledger(&next, false).unwrap());
    let tx_rows = ctx
        .header_index()
        .with_connection(|conn| conn.transactions_for_seq(sequence))
        .unwrap();
    assert_eq!(tx_rows.len(), 2);
}

#[test]
fn test_transaction_blob_round_trip() {
    let ctx = test_context();
    let genesis = accepted_genesis(&ctx);
    let mut next = Ledger::new_following(&genesis).unwrap();

    let plain = vec![9, 9, 9];
    let plain_id = sha512_half(&plain);
    next.add_transaction(plain_id, &plain).unwrap();

    let with_meta = vec![1, 1];
    let with_meta_id = sha512_half(&with_meta);
    let meta = meta_blob(with_meta_id, &[master_account()]);
    next.add_transaction_with_meta(with_meta_id, &with_meta, &meta)
        .unwrap();

    assert!(next.has_transaction(&plain_id).unwrap());
    assert_eq!(
        next.transaction_with_meta(&plain_id).unwrap().unwrap(),
        (plain.clone(), None)
    );
    assert_eq!(
        next.transaction_with_meta(&with_meta_id).unwrap().unwrap(),
        (with_meta, Some(meta))
    );
    assert!(next
        .transaction_blob(&Hash256::from_bytes([3; 32]))
        .unwrap()
        .is_none());

    // Duplicate insertion is refused.
    assert!(next.add_transaction(plain_id, &plain).is_err());
}

#[test]
fn test_hashes_by_index_range() {
    let ctx = test_context();
    let mut ledger = accepted_genesis(&ctx);
    let mut hashes = vec![ledger.hash()];

    for _ in 0..5 {
        let mut next = Ledger::new_following(&ledger).unwrap();
        next.set_closed();
        next.set_accepted();
        next.set_validated();
        hashes.push(next.hash());
        let arc = Arc::new(next);
        assert!(pend_save_validated(&arc, true, true));
        ledger = Arc::try_unwrap(arc).map_err(|_| ()).unwrap();
    }

    let range = ctx
        .header_index()
        .with_connection(|conn| conn.hashes_by_index_range(2, 5))
        .unwrap();
    assert_eq!(range.len(), 4);
    for seq in 2..=5u32 {
        let (hash, prev) = range[&seq];
        assert_eq!(hash, hashes[seq as usize - 1]);
        assert_eq!(prev, hashes[seq as usize - 2]);
    }

    let (hash, prev) = ctx
        .header_index()
        .with_connection(|conn| conn.hashes_by_index(3))
        .unwrap()
        .unwrap();
    assert_eq!(hash, hashes[2]);
    assert_eq!(prev, hashes[1]);
}

#[test]
fn test_from_header_without_nodes_is_not_loaded() {
    let ctx = test_context();
    let header = rill_ledger::LedgerHeader {
        sequence: 9,
        total_coins: 1,
        parent_hash: Hash256::from_bytes([1; 32]),
        tx_root: Hash256::from_bytes([2; 32]),
        state_root: Hash256::from_bytes([3; 32]),
        parent_close_time: 0,
        close_time: 0,
        close_resolution: 30,
        close_flags: 0,
    };
    let ledger = Ledger::from_header(Arc::clone(&ctx), header);
    assert!(!ledger.is_loaded());
    assert!(ledger.is_immutable());
}

#[test]
fn test_from_blob_round_trip() {
    let ctx = test_context();
    let ledger = accepted_genesis(&ctx);

    let body = ledger.header().to_bytes();
    let rebuilt = Ledger::from_blob(Arc::clone(&ctx), &body, false).unwrap();
    assert_eq!(rebuilt.hash(), ledger.hash());
    assert!(rebuilt.is_loaded());

    let prefixed = ledger.header().to_prefixed_bytes();
    let rebuilt = Ledger::from_blob(Arc::clone(&ctx), &prefixed, true).unwrap();
    assert_eq!(rebuilt.hash(), ledger.hash());

    assert!(Ledger::from_blob(Arc::clone(&ctx), &body[..10], false).is_err());
}

#[test]
fn test_open_at_startup_modes() {
    // Fresh: a genesis ledger.
    let ctx = test_context();
    let ledger = Ledger::open_at_startup(&ctx, master_account(), 100000)
        .unwrap()
        .unwrap();
    assert_eq!(ledger.sequence(), 1);

    // Load: the latest saved ledger wins over a fresh genesis.
    let mut config = LedgerConfig::standalone_for_test();
    config.startup_mode = rill_common::StartupMode::Load;
    let store = Arc::new(MemoryNodeStore::new());
    let ctx = LedgerContext::new(
        config,
        store,
        Database::open_in_memory().unwrap(),
        Arc::new(ManualClock::new(1_000_000)),
    );
    let mut saved = Ledger::new_genesis(Arc::clone(&ctx), master_account(), 100000).unwrap();
    saved.set_closed();
    saved.set_accepted();
    saved.set_validated();
    assert!(pend_save_validated(&Arc::new(saved), true, true));

    let reloaded = Ledger::open_at_startup(&ctx, master_account(), 100000)
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.sequence(), 1);
    assert!(reloaded.is_closed());

    // Network: the ledger comes from outside.
    let mut config = LedgerConfig::standalone_for_test();
    config.startup_mode = rill_common::StartupMode::Network;
    let ctx = LedgerContext::new(
        config,
        Arc::new(MemoryNodeStore::new()),
        Database::open_in_memory().unwrap(),
        Arc::new(ManualClock::new(1_000_000)),
    );
    assert!(Ledger::open_at_startup(&ctx, master_account(), 100000)
        .unwrap()
        .is_none());
}

#[test]
fn test_walk_maps_reports_completeness() {
    let ctx = test_context();
    let ledger = accepted_genesis(&ctx);
    let (missing_tx, missing_state) = ledger.walk_maps(32);
    assert!(missing_tx.is_empty());
    assert!(missing_state.is_empty());
}

#[test]
fn test_save_then_reload_keeps_map_roots() {
    let ctx = test_context();
    let genesis = accepted_genesis(&ctx);

    let mut next = Ledger::new_following(&genesis).unwrap();
    let extra = AccountId::from_bytes([0x33; 20]);
    let mut entry = LedgerEntry::new(
        LedgerEntryType::AccountRoot,
        keys::account_root_key(&extra),
    );
    entry.set_amount(FieldId::Balance, 77);
    next.write_back(LedgerStateParms::CREATE, &entry).unwrap();
    next.state_map_mut()
        .flush_dirty(rill_nodestore::NodeKind::AccountNode, 2);
    next.set_closed();
    next.set_accepted();
    next.set_validated();
    let next = Arc::new(next);
    assert!(pend_save_validated(&next, true, true));

    let reloaded = Ledger::load_by_index(&ctx, 2).unwrap().unwrap();
    assert_eq!(reloaded.state_root(), next.state_root());
    assert!(reloaded.has_account(&extra).unwrap());
    assert_eq!(
        reloaded
            .account_root(&extra)
            .unwrap()
            .unwrap()
            .get_amount(FieldId::Balance),
        Some(77)
    );
}
