//! The ledger.

use std::sync::Arc;

use parking_lot::Mutex;
use rill_common::{AccountId, Currency, Hash256, StartupMode};
use rill_nodestore::{HeaderIndexQueries, NodeKind, NodeStore};
use rill_protocol::keys;
use rill_protocol::{FieldId, LedgerEntry, LedgerEntryType, Serializer};
use rill_shamap::{LeafType, MapKind, SHAMap, SHAMapItem};
use tracing::{debug, error, warn};

use crate::context::LedgerContext;
use crate::error::LedgerError;
use crate::header::{LedgerHeader, CLOSE_FLAG_NO_CONSENSUS_TIME};
use crate::timing::{next_close_resolution, round_close_time, DEFAULT_CLOSE_RESOLUTION};
use crate::{LedgerStateParms, Result};

/// The fee schedule in force for a ledger: configured defaults overridden
/// by the on-ledger FeeSettings entry.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub base_fee: u64,
    pub reference_fee_units: u32,
    pub reserve_base: u32,
    pub reserve_increment: u32,
}

/// One block of the chain: a header plus the transaction and account-state
/// trees.
pub struct Ledger {
    ctx: Arc<LedgerContext>,
    header: LedgerHeader,
    hash: Hash256,
    valid_hash: bool,
    closed: bool,
    accepted: bool,
    validated: bool,
    immutable: bool,
    loaded: bool,
    tx_map: SHAMap,
    state_map: SHAMap,
    fees: Mutex<Option<FeeSchedule>>,
}

impl Ledger {
    fn new_map(ctx: &Arc<LedgerContext>, kind: MapKind) -> SHAMap {
        SHAMap::new(
            kind,
            Arc::clone(ctx.node_cache()),
            Arc::clone(ctx.full_below()),
            Some(Arc::clone(ctx.node_store())),
        )
    }

    fn map_with_root(ctx: &Arc<LedgerContext>, kind: MapKind, root: Hash256) -> SHAMap {
        SHAMap::with_root(
            kind,
            root,
            Arc::clone(ctx.node_cache()),
            Arc::clone(ctx.full_below()),
            Some(Arc::clone(ctx.node_store())),
        )
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// The starting bootstrap ledger: all coins in one master account.
    pub fn new_genesis(
        ctx: Arc<LedgerContext>,
        master: AccountId,
        start_amount: u64,
    ) -> Result<Self> {
        let mut ledger = Self {
            header: LedgerHeader {
                sequence: 1,
                total_coins: start_amount,
                close_resolution: DEFAULT_CLOSE_RESOLUTION,
                ..LedgerHeader::default()
            },
            hash: Hash256::ZERO,
            valid_hash: false,
            closed: false,
            accepted: false,
            validated: false,
            immutable: false,
            loaded: true,
            tx_map: Self::new_map(&ctx, MapKind::Transaction),
            state_map: Self::new_map(&ctx, MapKind::State),
            fees: Mutex::new(None),
            ctx,
        };
        ledger.tx_map.set_ledger_seq(1);
        ledger.state_map.set_ledger_seq(1);

        let mut root = LedgerEntry::new(LedgerEntryType::AccountRoot, keys::account_root_key(&master));
        root.set_account(FieldId::Account, master);
        root.set_amount(FieldId::Balance, start_amount);
        root.set_u32(FieldId::Sequence, 1);
        debug!(account = %master, balance = start_amount, "creating genesis account");

        ledger.write_back(LedgerStateParms::CREATE, &root)?;
        ledger.state_map.flush_dirty(NodeKind::AccountNode, 1);
        ledger.update_hash();
        Ok(ledger)
    }

    /// Rebuild a ledger from known header fields, attaching both maps from
    /// the node store. `is_loaded` reports whether the attach succeeded;
    /// the ledger is immutable either way.
    pub fn from_header(ctx: Arc<LedgerContext>, header: LedgerHeader) -> Self {
        let tx_root = header.tx_root;
        let state_root = header.state_root;
        let mut ledger = Self {
            tx_map: Self::map_with_root(&ctx, MapKind::Transaction, tx_root),
            state_map: Self::map_with_root(&ctx, MapKind::State, state_root),
            hash: Hash256::ZERO,
            valid_hash: false,
            closed: false,
            accepted: false,
            validated: false,
            immutable: true,
            loaded: true,
            fees: Mutex::new(None),
            header,
            ctx,
        };
        ledger.tx_map.set_ledger_seq(ledger.header.sequence);
        ledger.state_map.set_ledger_seq(ledger.header.sequence);
        ledger.update_hash();

        if !tx_root.is_zero() && ledger.tx_map.fetch_root(tx_root, None).is_err() {
            warn!(ledger = ledger.header.sequence, "don't have transaction root");
            ledger.loaded = false;
        }
        if !state_root.is_zero() && ledger.state_map.fetch_root(state_root, None).is_err() {
            warn!(ledger = ledger.header.sequence, "don't have state root");
            ledger.loaded = false;
        }
        ledger.tx_map.set_immutable();
        ledger.state_map.set_immutable();
        ledger
    }

    /// Rebuild a ledger from a serialized header blob.
    pub fn from_blob(ctx: Arc<LedgerContext>, blob: &[u8], has_prefix: bool) -> Result<Self> {
        let header = LedgerHeader::set_raw(blob, has_prefix)?;
        Ok(Self::from_header(ctx, header))
    }

    /// The mutable ledger following an immutable parent: a fresh
    /// transaction tree and a copy-on-write snapshot of the parent state.
    pub fn new_following(parent: &Ledger) -> Result<Self> {
        debug_assert!(parent.immutable, "successor of a mutable ledger");
        debug_assert!(!parent.hash.is_zero());

        let sequence = parent.header.sequence + 1;
        let close_resolution = next_close_resolution(
            parent.header.close_resolution,
            parent.close_agree(),
            sequence,
        );

        let mut ledger = Self {
            ctx: Arc::clone(&parent.ctx),
            header: LedgerHeader {
                sequence,
                total_coins: parent.header.total_coins,
                parent_hash: parent.hash,
                tx_root: Hash256::ZERO,
                state_root: Hash256::ZERO,
                parent_close_time: parent.header.close_time,
                close_time: 0,
                close_resolution,
                close_flags: 0,
            },
            hash: Hash256::ZERO,
            valid_hash: false,
            closed: false,
            accepted: false,
            validated: false,
            immutable: false,
            loaded: true,
            tx_map: Self::new_map(&parent.ctx, MapKind::Transaction),
            state_map: parent.state_map.frozen_snapshot(true),
            fees: Mutex::new(None),
        };
        ledger.tx_map.set_ledger_seq(sequence);
        ledger.state_map.set_ledger_seq(sequence);

        ledger.header.close_time = if parent.header.close_time == 0 {
            round_close_time(ledger.ctx.close_time_now(), close_resolution)
        } else {
            parent.header.close_time + u32::from(close_resolution)
        };

        ledger.update_skip_list()?;
        ledger.update_hash();
        Ok(ledger)
    }

    /// A structurally shared copy of this ledger.
    pub fn snapshot(&mut self, make_mutable: bool) -> Self {
        if !self.immutable {
            self.update_hash();
        }
        let tx_map = self.tx_map.snapshot(make_mutable);
        let state_map = self.state_map.snapshot(make_mutable);
        let mut copy = Self {
            ctx: Arc::clone(&self.ctx),
            header: self.header.clone(),
            hash: Hash256::ZERO,
            valid_hash: false,
            closed: self.closed,
            accepted: self.accepted,
            validated: self.validated,
            immutable: !make_mutable,
            loaded: self.loaded,
            tx_map,
            state_map,
            fees: Mutex::new(*self.fees.lock()),
        };
        copy.update_hash();
        copy
    }

    /// Start from config: a fresh genesis, the latest stored ledger, or
    /// `None` when the mode hands control to an external source (a file or
    /// the network).
    pub fn open_at_startup(
        ctx: &Arc<LedgerContext>,
        master: AccountId,
        start_amount: u64,
    ) -> Result<Option<Self>> {
        match ctx.config().startup_mode {
            StartupMode::Fresh => Ok(Some(Self::new_genesis(
                Arc::clone(ctx),
                master,
                start_amount,
            )?)),
            StartupMode::Load | StartupMode::Replay => match Self::load_latest(ctx)? {
                Some(ledger) => Ok(Some(ledger)),
                None => Ok(Some(Self::new_genesis(Arc::clone(ctx), master, start_amount)?)),
            },
            StartupMode::LoadFile | StartupMode::Network => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Header-index loaders
    // ------------------------------------------------------------------

    fn from_header_row(
        ctx: &Arc<LedgerContext>,
        row: rill_nodestore::LedgerHeaderRow,
    ) -> Option<Self> {
        let header = LedgerHeader {
            sequence: row.ledger_seq,
            total_coins: row.total_coins,
            parent_hash: row.prev_hash,
            tx_root: row.trans_set_hash,
            state_root: row.account_set_hash,
            parent_close_time: row.prev_closing_time.min(u64::from(u32::MAX)) as u32,
            close_time: row.closing_time.min(u64::from(u32::MAX)) as u32,
            close_resolution: row.close_time_res,
            close_flags: row.close_flags,
        };
        let mut ledger = Self::from_header(Arc::clone(ctx), header);
        if !ledger.loaded {
            return None;
        }
        ledger.closed = true;
        if ledger.hash != row.ledger_hash {
            error!(
                sequence = row.ledger_seq,
                expected = %row.ledger_hash,
                actual = %ledger.hash,
                "stored header fails hash check"
            );
            return None;
        }
        Some(ledger)
    }

    /// Load a ledger by sequence from the header index.
    pub fn load_by_index(ctx: &Arc<LedgerContext>, sequence: u32) -> Result<Option<Self>> {
        let row = ctx
            .header_index()
            .with_connection(|conn| conn.load_header_by_seq(sequence))?;
        Ok(row.and_then(|row| Self::from_header_row(ctx, row)))
    }

    /// Load a ledger by hash from the header index.
    pub fn load_by_hash(ctx: &Arc<LedgerContext>, hash: &Hash256) -> Result<Option<Self>> {
        let row = ctx
            .header_index()
            .with_connection(|conn| conn.load_header_by_hash(hash))?;
        Ok(row.and_then(|row| Self::from_header_row(ctx, row)))
    }

    /// Load the highest-sequence stored ledger.
    pub fn load_latest(ctx: &Arc<LedgerContext>) -> Result<Option<Self>> {
        let row = ctx
            .header_index()
            .with_connection(|conn| conn.latest_header())?;
        Ok(row.and_then(|row| Self::from_header_row(ctx, row)))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn context(&self) -> &Arc<LedgerContext> {
        &self.ctx
    }

    pub fn header(&self) -> &LedgerHeader {
        &self.header
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn total_coins(&self) -> u64 {
        self.header.total_coins
    }

    /// Burn fees out of existence.
    pub fn destroy_coins(&mut self, fee: u64) {
        debug_assert!(!self.immutable);
        self.header.total_coins = self.header.total_coins.saturating_sub(fee);
        self.valid_hash = false;
    }

    pub fn parent_hash(&self) -> Hash256 {
        self.header.parent_hash
    }

    pub fn tx_root(&self) -> Hash256 {
        self.header.tx_root
    }

    pub fn state_root(&self) -> Hash256 {
        self.header.state_root
    }

    pub fn close_time(&self) -> u32 {
        self.header.close_time
    }

    pub fn parent_close_time(&self) -> u32 {
        self.header.parent_close_time
    }

    pub fn close_resolution(&self) -> u8 {
        self.header.close_resolution
    }

    pub fn close_agree(&self) -> bool {
        self.header.close_agree()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn is_fixed(&self) -> bool {
        self.closed || self.immutable
    }

    /// Whether both map roots attached when loading from storage.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_closed(&mut self) {
        self.closed = true;
    }

    pub fn set_validated(&mut self) {
        self.validated = true;
    }

    /// Accept with a witnessed consensus close time.
    pub fn set_accepted_with(
        &mut self,
        close_time: u32,
        close_resolution: u8,
        correct_close_time: bool,
    ) {
        debug_assert!(self.closed && !self.accepted);
        self.header.close_time = if correct_close_time {
            round_close_time(close_time, close_resolution)
        } else {
            close_time
        };
        self.header.close_resolution = close_resolution;
        self.header.close_flags = if correct_close_time {
            0
        } else {
            CLOSE_FLAG_NO_CONSENSUS_TIME
        };
        self.accepted = true;
        self.set_immutable();
    }

    /// Accept an acquired ledger, rounding its recorded close time unless
    /// it was only an estimate.
    pub fn set_accepted(&mut self) {
        if self.header.close_flags & CLOSE_FLAG_NO_CONSENSUS_TIME == 0 {
            self.header.close_time =
                round_close_time(self.header.close_time, self.header.close_resolution);
        }
        self.accepted = true;
        self.set_immutable();
    }

    /// Recompute the hash, then freeze the ledger and both maps.
    pub fn set_immutable(&mut self) {
        self.update_hash();
        self.immutable = true;
        self.tx_map.set_immutable();
        self.state_map.set_immutable();
    }

    /// Recompute tree roots (unless frozen) and the header hash.
    pub fn update_hash(&mut self) {
        if !self.immutable {
            self.header.tx_root = self.tx_map.hash();
            self.header.state_root = self.state_map.hash();
        }
        self.hash = self.header.compute_hash();
        self.valid_hash = true;
    }

    /// The cached ledger hash.
    pub fn hash(&self) -> Hash256 {
        debug_assert!(self.valid_hash);
        self.hash
    }

    /// The ledger hash, recomputing if stale.
    pub fn get_hash(&mut self) -> Hash256 {
        if !self.valid_hash {
            self.update_hash();
        }
        self.hash
    }

    /// Append the header body (for signing or persistence).
    pub fn add_raw(&self, s: &mut Serializer) {
        self.header.add_raw(s);
    }

    // ------------------------------------------------------------------
    // Synching
    // ------------------------------------------------------------------

    /// Mark both maps as possibly incomplete.
    pub fn set_acquiring(&mut self) {
        self.tx_map.set_synching();
        self.state_map.set_synching();
    }

    pub fn is_acquiring(&self) -> bool {
        self.is_acquiring_tx() || self.is_acquiring_state()
    }

    pub fn is_acquiring_tx(&self) -> bool {
        self.tx_map.is_synching()
    }

    pub fn is_acquiring_state(&self) -> bool {
        self.state_map.is_synching()
    }

    pub fn tx_map(&self) -> &SHAMap {
        &self.tx_map
    }

    pub fn tx_map_mut(&mut self) -> &mut SHAMap {
        &mut self.tx_map
    }

    pub fn state_map(&self) -> &SHAMap {
        &self.state_map
    }

    pub fn state_map_mut(&mut self) -> &mut SHAMap {
        &mut self.state_map
    }

    /// Hashes still needed to complete the transaction tree.
    pub fn needed_tx_hashes(&self, max: usize, filter: Option<&dyn NodeStore>) -> Vec<Hash256> {
        if self.header.tx_root.is_zero() {
            return Vec::new();
        }
        self.tx_map.get_needed_hashes(max, filter)
    }

    /// Hashes still needed to complete the state tree.
    pub fn needed_state_hashes(&self, max: usize, filter: Option<&dyn NodeStore>) -> Vec<Hash256> {
        if self.header.state_root.is_zero() {
            return Vec::new();
        }
        self.state_map.get_needed_hashes(max, filter)
    }

    /// Walk both maps, returning up to `max` missing nodes from each and
    /// logging what was found.
    pub fn walk_maps(&self, max: usize) -> (Vec<Hash256>, Vec<Hash256>) {
        let missing_state = self.state_map.walk_map(max);
        if !missing_state.is_empty() {
            warn!(
                count = missing_state.len(),
                first = %missing_state[0],
                "missing account state nodes"
            );
        }
        let missing_tx = self.tx_map.walk_map(max);
        if !missing_tx.is_empty() {
            warn!(
                count = missing_tx.len(),
                first = %missing_tx[0],
                "missing transaction nodes"
            );
        }
        (missing_tx, missing_state)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Add a transaction blob under its id.
    pub fn add_transaction(&mut self, id: Hash256, txn: &[u8]) -> Result<()> {
        let item = SHAMapItem::new(id, txn.to_vec());
        if let Err(err) = self.tx_map.add_item(item, false) {
            warn!(tx = %id, "attempt to add duplicate transaction");
            return Err(err.into());
        }
        self.valid_hash = false;
        Ok(())
    }

    /// Add a transaction blob and its metadata under the transaction id.
    pub fn add_transaction_with_meta(
        &mut self,
        id: Hash256,
        txn: &[u8],
        meta: &[u8],
    ) -> Result<()> {
        let mut s = Serializer::with_capacity(txn.len() + meta.len() + 16);
        s.add_vl(txn)?;
        s.add_vl(meta)?;
        let item = SHAMapItem::new(id, s.into_bytes());
        if let Err(err) = self.tx_map.add_item(item, true) {
            warn!(tx = %id, "attempt to add duplicate transaction with metadata");
            return Err(err.into());
        }
        self.valid_hash = false;
        Ok(())
    }

    pub fn has_transaction(&self, id: &Hash256) -> Result<bool> {
        Ok(self.tx_map.has_item(id)?)
    }

    /// The raw transaction blob, splitting off metadata when present.
    pub fn transaction_blob(&self, id: &Hash256) -> Result<Option<Vec<u8>>> {
        Ok(self.transaction_with_meta(id)?.map(|(txn, _)| txn))
    }

    /// The transaction blob and its metadata, when stored with any.
    pub fn transaction_with_meta(
        &self,
        id: &Hash256,
    ) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        let Some((item, leaf_type)) = self.tx_map.peek_item_with_type(id)? else {
            return Ok(None);
        };
        match leaf_type {
            LeafType::Transaction => Ok(Some((item.data().to_vec(), None))),
            LeafType::TransactionWithMeta => {
                let mut it = rill_protocol::SerializerIterator::new(item.data());
                let txn = it.get_vl()?;
                let meta = it.get_vl()?;
                Ok(Some((txn, Some(meta))))
            }
            LeafType::State => Err(LedgerError::Internal(
                "state leaf in transaction tree".into(),
            )),
        }
    }

    // ------------------------------------------------------------------
    // State access
    // ------------------------------------------------------------------

    /// The immutable, cached entry at `key`.
    pub fn entry(&self, key: &Hash256) -> Result<Option<Arc<LedgerEntry>>> {
        let Some((item, leaf_hash)) = self.state_map.peek_item_with_hash(key)? else {
            return Ok(None);
        };
        if let Some(cached) = self.ctx.entry_cache().fetch(&leaf_hash) {
            return Ok(Some(cached));
        }
        let entry = LedgerEntry::from_bytes(item.data(), *key)?;
        Ok(Some(
            self.ctx.entry_cache().canonicalize(leaf_hash, Arc::new(entry)),
        ))
    }

    /// A freshly decoded, privately owned entry at `key`.
    pub fn entry_owned(&self, key: &Hash256) -> Result<Option<LedgerEntry>> {
        let Some(item) = self.state_map.peek_item(key)? else {
            return Ok(None);
        };
        Ok(Some(LedgerEntry::from_bytes(item.data(), *key)?))
    }

    fn typed_entry(
        &self,
        key: &Hash256,
        entry_type: LedgerEntryType,
    ) -> Result<Option<Arc<LedgerEntry>>> {
        Ok(self.entry(key)?.filter(|e| e.entry_type() == entry_type))
    }

    /// Fetch an entry with create-if-absent semantics.
    ///
    /// The returned bits say what happened: `OKAY` with the decoded entry,
    /// `CREATED | OKAY` with a fresh entry of `entry_type` when the
    /// `CREATE` bit was set, `MISSING` or `WRONG_TYPE` with no entry
    /// otherwise.
    pub fn entry_with_parms(
        &self,
        parms: LedgerStateParms,
        key: &Hash256,
        entry_type: LedgerEntryType,
    ) -> Result<(LedgerStateParms, Option<LedgerEntry>)> {
        match self.state_map.peek_item(key)? {
            None => {
                if !parms.contains(LedgerStateParms::CREATE) {
                    return Ok((LedgerStateParms::MISSING, None));
                }
                Ok((
                    LedgerStateParms::CREATED | LedgerStateParms::OKAY,
                    Some(LedgerEntry::new(entry_type, *key)),
                ))
            }
            Some(item) => {
                let entry = LedgerEntry::from_bytes(item.data(), *key)?;
                if entry.entry_type() != entry_type {
                    return Ok((LedgerStateParms::WRONG_TYPE, None));
                }
                Ok((LedgerStateParms::OKAY, Some(entry)))
            }
        }
    }

    /// Write an entry into the state tree.
    ///
    /// Inserts when absent and the `CREATE` bit is set (`CREATED`);
    /// updates when present (`OKAY`); reports `MISSING` when absent
    /// without `CREATE`. Never silently creates.
    pub fn write_back(
        &mut self,
        parms: LedgerStateParms,
        entry: &LedgerEntry,
    ) -> Result<LedgerStateParms> {
        let key = entry.index();
        let exists = self.state_map.has_item(&key)?;
        if !exists && !parms.contains(LedgerStateParms::CREATE) {
            warn!(key = %key, "write-back of absent entry without create");
            return Ok(LedgerStateParms::MISSING);
        }

        let item = SHAMapItem::new(key, entry.serialize()?);
        if exists {
            self.state_map.update_item(item, false)?;
            self.valid_hash = false;
            Ok(LedgerStateParms::OKAY)
        } else {
            self.state_map.add_item(item, false)?;
            self.valid_hash = false;
            Ok(LedgerStateParms::CREATED)
        }
    }

    /// Insert a pre-built entry; fails if the key is occupied.
    pub fn add_state_entry(&mut self, entry: &LedgerEntry) -> Result<()> {
        let item = SHAMapItem::new(entry.index(), entry.serialize()?);
        self.state_map.add_item(item, false)?;
        self.valid_hash = false;
        Ok(())
    }

    /// Remove the entry at `key`; fails if absent.
    pub fn delete_state_entry(&mut self, key: &Hash256) -> Result<()> {
        self.state_map.delete_item(key)?;
        self.valid_hash = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Typed accessors
    // ------------------------------------------------------------------

    pub fn has_account(&self, account: &AccountId) -> Result<bool> {
        Ok(self.state_map.has_item(&keys::account_root_key(account))?)
    }

    pub fn account_root(&self, account: &AccountId) -> Result<Option<Arc<LedgerEntry>>> {
        self.typed_entry(&keys::account_root_key(account), LedgerEntryType::AccountRoot)
    }

    /// The full account state, if the account exists.
    pub fn account_state(&self, account: &AccountId) -> Result<Option<Arc<LedgerEntry>>> {
        let state = self.account_root(account)?;
        if state.is_none() {
            debug!(account = %account, "account state not found");
        }
        Ok(state)
    }

    pub fn dir_node(&self, key: &Hash256) -> Result<Option<Arc<LedgerEntry>>> {
        self.typed_entry(key, LedgerEntryType::DirectoryNode)
    }

    pub fn offer(&self, key: &Hash256) -> Result<Option<Arc<LedgerEntry>>> {
        self.typed_entry(key, LedgerEntryType::Offer)
    }

    pub fn offer_by(&self, account: &AccountId, sequence: u32) -> Result<Option<Arc<LedgerEntry>>> {
        self.offer(&keys::offer_key(account, sequence))
    }

    pub fn ripple_state(
        &self,
        a: &AccountId,
        b: &AccountId,
        currency: &Currency,
    ) -> Result<Option<Arc<LedgerEntry>>> {
        self.typed_entry(
            &keys::ripple_state_key(a, b, currency),
            LedgerEntryType::RippleState,
        )
    }

    pub fn generator(&self, generator: &AccountId) -> Result<Option<Arc<LedgerEntry>>> {
        self.typed_entry(&keys::generator_key(generator), LedgerEntryType::Generator)
    }

    pub fn ticket(&self, account: &AccountId, sequence: u32) -> Result<Option<Arc<LedgerEntry>>> {
        self.typed_entry(&keys::ticket_key(account, sequence), LedgerEntryType::Ticket)
    }

    /// The enabled amendments, or empty when the table is absent.
    pub fn amendments(&self) -> Result<Vec<Hash256>> {
        Ok(self
            .entry(&keys::amendments_key())?
            .and_then(|entry| entry.get_v256(FieldId::Amendments).map(<[Hash256]>::to_vec))
            .unwrap_or_default())
    }

    /// Whether freeze flags are enforced as of this ledger.
    pub fn enforce_freeze(&self) -> bool {
        self.ctx
            .config()
            .enforce_freeze(u64::from(self.header.parent_close_time))
    }

    // ------------------------------------------------------------------
    // Ordered state stepping
    // ------------------------------------------------------------------

    pub fn first_entry_key(&self) -> Result<Option<Hash256>> {
        Ok(self.state_map.peek_first_item()?.map(|item| item.tag()))
    }

    pub fn last_entry_key(&self) -> Result<Option<Hash256>> {
        Ok(self.state_map.peek_last_item()?.map(|item| item.tag()))
    }

    /// First state key strictly greater than `key`.
    pub fn next_entry_key(&self, key: &Hash256) -> Result<Option<Hash256>> {
        Ok(self.state_map.peek_next_item(key)?.map(|item| item.tag()))
    }

    /// First state key strictly greater than `key` but not past `end`.
    pub fn next_entry_key_bounded(
        &self,
        key: &Hash256,
        end: &Hash256,
    ) -> Result<Option<Hash256>> {
        Ok(self
            .next_entry_key(key)?
            .filter(|found| found <= end))
    }

    /// Last state key strictly less than `key`.
    pub fn prev_entry_key(&self, key: &Hash256) -> Result<Option<Hash256>> {
        Ok(self.state_map.peek_prev_item(key)?.map(|item| item.tag()))
    }

    /// Last state key strictly less than `key` but not before `begin`.
    pub fn prev_entry_key_bounded(
        &self,
        key: &Hash256,
        begin: &Hash256,
    ) -> Result<Option<Hash256>> {
        Ok(self
            .prev_entry_key(key)?
            .filter(|found| found >= begin))
    }

    /// Visit every state entry in key order.
    pub fn visit_state_entries(
        &self,
        visit: &mut dyn FnMut(&Arc<LedgerEntry>),
    ) -> Result<()> {
        let mut decode_error = None;
        self.state_map.visit_leaves(&mut |item| {
            if decode_error.is_some() {
                return;
            }
            match LedgerEntry::from_bytes(item.data(), item.tag()) {
                Ok(entry) => visit(&Arc::new(entry)),
                Err(err) => decode_error = Some(err),
            }
        })?;
        match decode_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Owner directories
    // ------------------------------------------------------------------

    /// Visit every entry in `account`'s owner directory, following the
    /// page links from the root.
    pub fn visit_account_items(
        &self,
        account: &AccountId,
        visit: &mut dyn FnMut(&Arc<LedgerEntry>),
    ) -> Result<()> {
        let root_key = keys::owner_dir_key(account);
        let mut current = root_key;
        loop {
            let Some(dir) = self.dir_node(&current)? else {
                return Ok(());
            };
            for key in dir.get_v256(FieldId::Indexes).unwrap_or(&[]) {
                if let Some(entry) = self.entry(key)? {
                    visit(&entry);
                }
            }
            let next = dir.get_u64(FieldId::IndexNext).unwrap_or(0);
            if next == 0 {
                return Ok(());
            }
            current = keys::dir_node_key(&root_key, next);
        }
    }

    /// Resume an owner-directory walk after `start_after`, seeded with a
    /// page hint, visiting at most `limit` counted entries. `visit`
    /// returns whether the entry counted against the limit. Returns
    /// whether `start_after` was found.
    pub fn visit_account_items_from(
        &self,
        account: &AccountId,
        start_after: &Hash256,
        page_hint: u64,
        limit: usize,
        visit: &mut dyn FnMut(&Arc<LedgerEntry>) -> bool,
    ) -> Result<bool> {
        let root_key = keys::owner_dir_key(account);
        let mut current = root_key;
        let mut remaining = limit;

        if start_after.is_zero() {
            loop {
                let Some(dir) = self.dir_node(&current)? else {
                    return Ok(true);
                };
                for key in dir.get_v256(FieldId::Indexes).unwrap_or(&[]) {
                    if let Some(entry) = self.entry(key)? {
                        if visit(&entry) {
                            remaining = remaining.saturating_sub(1);
                            if remaining == 0 {
                                return Ok(true);
                            }
                        }
                    }
                }
                let next = dir.get_u64(FieldId::IndexNext).unwrap_or(0);
                if next == 0 {
                    return Ok(true);
                }
                current = keys::dir_node_key(&root_key, next);
            }
        }

        // Try jumping straight to the hinted page.
        let hint_key = keys::dir_node_key(&root_key, page_hint);
        if let Some(hint_dir) = self.dir_node(&hint_key)? {
            let hinted = hint_dir
                .get_v256(FieldId::Indexes)
                .unwrap_or(&[])
                .contains(start_after);
            if hinted {
                current = hint_key;
            }
        }

        let mut found = false;
        loop {
            let Some(dir) = self.dir_node(&current)? else {
                return Ok(found);
            };
            for key in dir.get_v256(FieldId::Indexes).unwrap_or(&[]) {
                if !found {
                    if key == start_after {
                        found = true;
                    }
                } else if let Some(entry) = self.entry(key)? {
                    if visit(&entry) {
                        remaining = remaining.saturating_sub(1);
                        if remaining == 0 {
                            return Ok(found);
                        }
                    }
                }
            }
            let next = dir.get_u64(FieldId::IndexNext).unwrap_or(0);
            if next == 0 {
                return Ok(found);
            }
            current = keys::dir_node_key(&root_key, next);
        }
    }

    // ------------------------------------------------------------------
    // Historical hashes
    // ------------------------------------------------------------------

    /// The hash of an earlier ledger in this chain, when still derivable:
    /// from the header for the last two, from the sliding skiplist within
    /// 256, from the paged skiplist for multiples of 256 beyond that.
    pub fn ledger_hash(&self, target: u32) -> Result<Option<Hash256>> {
        let own = self.header.sequence;
        if target > own {
            warn!(target, own, "can't get hash of a future ledger");
            return Ok(None);
        }
        if target == own {
            return Ok(Some(self.hash));
        }
        if target == own - 1 {
            return Ok(Some(self.header.parent_hash));
        }

        let diff = (own - target) as usize;
        if diff <= 256 {
            if let Some(list) = self.entry(&keys::skiplist_key())? {
                debug_assert_eq!(
                    list.get_u32(FieldId::LastLedgerSequence),
                    Some(own - 1)
                );
                let hashes = list.get_v256(FieldId::Hashes).unwrap_or(&[]);
                if hashes.len() >= diff {
                    return Ok(Some(hashes[hashes.len() - diff]));
                }
                warn!(own, target, have = hashes.len(), "skiplist too short");
            } else {
                warn!(own, "missing sliding skiplist");
            }
        }

        if target % 256 != 0 {
            warn!(target, own, "hash not retained");
            return Ok(None);
        }

        if let Some(list) = self.entry(&keys::skiplist_key_for(target))? {
            let last_seq = list.get_u32(FieldId::LastLedgerSequence).unwrap_or(0);
            debug_assert!(last_seq >= target);
            debug_assert_eq!(last_seq % 256, 0);
            let offset = ((last_seq - target) >> 8) as usize;
            let hashes = list.get_v256(FieldId::Hashes).unwrap_or(&[]);
            if hashes.len() > offset {
                return Ok(Some(hashes[hashes.len() - offset - 1]));
            }
        }

        warn!(target, own, "hash not found");
        Ok(None)
    }

    /// The recent `(sequence, hash)` pairs recorded in the sliding
    /// skiplist.
    pub fn ledger_hashes(&self) -> Result<Vec<(u32, Hash256)>> {
        let Some(list) = self.entry(&keys::skiplist_key())? else {
            return Ok(Vec::new());
        };
        let hashes = list.get_v256(FieldId::Hashes).unwrap_or(&[]);
        let last = list.get_u32(FieldId::LastLedgerSequence).unwrap_or(0);
        let mut seq = last.saturating_sub(hashes.len() as u32);
        Ok(hashes
            .iter()
            .map(|hash| {
                seq += 1;
                (seq, *hash)
            })
            .collect())
    }

    /// Record the parent hash in the skiplists. Runs while building a
    /// successor.
    pub fn update_skip_list(&mut self) -> Result<()> {
        if self.header.sequence == 0 {
            return Ok(());
        }
        let prev = self.header.sequence - 1;
        let parent_hash = self.header.parent_hash;

        // The paged list records every 256th ledger.
        if prev % 256 == 0 {
            let key = keys::skiplist_key_for(prev);
            let mut list = match self.entry_owned(&key)? {
                Some(list) => list,
                None => LedgerEntry::new(LedgerEntryType::LedgerHashes, key),
            };
            let mut hashes = list
                .get_v256(FieldId::Hashes)
                .map(<[Hash256]>::to_vec)
                .unwrap_or_default();
            debug_assert!(hashes.len() <= 256);
            hashes.push(parent_hash);
            list.set_v256(FieldId::Hashes, hashes);
            list.set_u32(FieldId::LastLedgerSequence, prev);
            self.write_back(LedgerStateParms::CREATE, &list)?;
        }

        // The sliding list records the last 256 ledgers.
        let key = keys::skiplist_key();
        let mut list = match self.entry_owned(&key)? {
            Some(list) => list,
            None => LedgerEntry::new(LedgerEntryType::LedgerHashes, key),
        };
        let mut hashes = list
            .get_v256(FieldId::Hashes)
            .map(<[Hash256]>::to_vec)
            .unwrap_or_default();
        debug_assert!(hashes.len() <= 256);
        if hashes.len() == 256 {
            hashes.remove(0);
        }
        hashes.push(parent_hash);
        list.set_v256(FieldId::Hashes, hashes);
        list.set_u32(FieldId::LastLedgerSequence, prev);
        self.write_back(LedgerStateParms::CREATE, &list)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fees
    // ------------------------------------------------------------------

    /// The fee schedule, loaded lazily from the FeeSettings entry with
    /// configured defaults.
    pub fn fee_schedule(&self) -> FeeSchedule {
        if let Some(schedule) = *self.fees.lock() {
            return schedule;
        }

        let config = self.ctx.config();
        let mut schedule = FeeSchedule {
            base_fee: config.fee_default,
            reference_fee_units: config.transaction_fee_base,
            reserve_base: config.fee_account_reserve,
            reserve_increment: config.fee_owner_reserve,
        };

        match self.entry_with_parms(
            LedgerStateParms::NONE,
            &keys::fee_settings_key(),
            LedgerEntryType::FeeSettings,
        ) {
            Ok((_, Some(entry))) => {
                if let Some(fee) = entry.get_u64(FieldId::BaseFee) {
                    schedule.base_fee = fee;
                }
                if let Some(units) = entry.get_u32(FieldId::ReferenceFeeUnits) {
                    schedule.reference_fee_units = units;
                }
                if let Some(base) = entry.get_u32(FieldId::ReserveBase) {
                    schedule.reserve_base = base;
                }
                if let Some(increment) = entry.get_u32(FieldId::ReserveIncrement) {
                    schedule.reserve_increment = increment;
                }
            }
            Ok((_, None)) => {}
            Err(err) => debug!(%err, "fee settings unavailable, using defaults"),
        }

        let mut guard = self.fees.lock();
        if guard.is_none() {
            *guard = Some(schedule);
        }
        guard.unwrap_or(schedule)
    }

    /// Cost of the reference transaction, in drops.
    pub fn base_fee(&self) -> u64 {
        self.fee_schedule().base_fee
    }

    /// Cost of the reference transaction, in fee units.
    pub fn reference_fee_units(&self) -> u32 {
        self.fee_schedule().reference_fee_units
    }

    /// Required reserve for an account owning `owner_count` entries.
    pub fn reserve(&self, owner_count: u32) -> u64 {
        let schedule = self.fee_schedule();
        u64::from(owner_count) * u64::from(schedule.reserve_increment)
            + u64::from(schedule.reserve_base)
    }

    pub fn reserve_increment(&self) -> u64 {
        u64::from(self.fee_schedule().reserve_increment)
    }

    /// Convert a fee in fee units to drops.
    pub fn scale_fee_base(&self, fee: u64) -> u64 {
        let schedule = self.fee_schedule();
        fee.saturating_mul(schedule.base_fee) / u64::from(schedule.reference_fee_units.max(1))
    }

    /// Convert a fee in fee units to drops under load. `load_factor` over
    /// `load_base` is the congestion multiplier supplied by the caller.
    pub fn scale_fee_load(&self, fee: u64, load_factor: u64, load_base: u64) -> u64 {
        self.scale_fee_base(fee).saturating_mul(load_factor) / load_base.max(1)
    }

    // ------------------------------------------------------------------
    // Sanity
    // ------------------------------------------------------------------

    /// Verify the header commits to the live map roots and nothing is
    /// zero. Precondition to persistence.
    pub fn assert_sane(&self) -> bool {
        if !self.hash.is_zero()
            && !self.header.state_root.is_zero()
            && self.header.state_root == self.state_map.hash()
            && self.header.tx_root == self.tx_map.hash()
        {
            return true;
        }
        error!(
            sequence = self.header.sequence,
            state_root = %self.header.state_root,
            tx_root = %self.header.tx_root,
            "ledger is not sane"
        );
        false
    }
}
