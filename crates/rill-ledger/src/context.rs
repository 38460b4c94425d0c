//! The engine context.
//!
//! Everything a ledger needs from its surroundings lives here: the node
//! store, the header index, the three shared caches, the background job
//! queue, the clock, and configuration. The context is engine-scoped, not
//! process-scoped; tests build as many as they like.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rill_common::{Clock, Hash256, LedgerConfig, SystemClock, TaggedCache};
use rill_nodestore::{Database, NodeStore};
use rill_protocol::LedgerEntry;
use rill_shamap::{FullBelowCache, TreeNodeCache};
use rill_work::JobQueue;

/// Cache of immutable decoded ledger entries, keyed by leaf hash.
///
/// Hot state reads mostly re-use entries of the parent ledger, so this
/// cache carries most lookups.
pub struct LedgerEntryCache {
    cache: TaggedCache<Hash256, LedgerEntry>,
}

impl LedgerEntryCache {
    pub fn new(target_size: usize, target_age: Duration) -> Self {
        Self {
            cache: TaggedCache::new("ledger-entries", target_size, target_age),
        }
    }

    pub fn fetch(&self, leaf_hash: &Hash256) -> Option<Arc<LedgerEntry>> {
        self.cache.fetch(leaf_hash)
    }

    pub fn canonicalize(&self, leaf_hash: Hash256, entry: Arc<LedgerEntry>) -> Arc<LedgerEntry> {
        self.cache.canonicalize(leaf_hash, entry)
    }

    pub fn sweep(&self) {
        self.cache.sweep()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Shared collaborators of the ledger engine.
pub struct LedgerContext {
    config: LedgerConfig,
    node_store: Arc<dyn NodeStore>,
    header_index: Database,
    node_cache: Arc<TreeNodeCache>,
    full_below: Arc<FullBelowCache>,
    entry_cache: LedgerEntryCache,
    job_queue: Arc<JobQueue>,
    clock: Arc<dyn Clock>,
    pending_saves: Mutex<BTreeSet<u32>>,
    saved_hashes: Mutex<std::collections::HashSet<Hash256>>,
}

impl LedgerContext {
    /// Build a context around the given sinks and clock.
    pub fn new(
        config: LedgerConfig,
        node_store: Arc<dyn NodeStore>,
        header_index: Database,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let node_age = Duration::from_secs(config.node_cache_age_secs);
        let entry_age = Duration::from_secs(config.entry_cache_age_secs);
        Arc::new(Self {
            node_cache: Arc::new(TreeNodeCache::new(config.node_cache_size, node_age)),
            full_below: Arc::new(FullBelowCache::new(config.node_cache_size, node_age)),
            entry_cache: LedgerEntryCache::new(config.entry_cache_size, entry_age),
            job_queue: Arc::new(JobQueue::new(2)),
            pending_saves: Mutex::new(BTreeSet::new()),
            saved_hashes: Mutex::new(std::collections::HashSet::new()),
            config,
            node_store,
            header_index,
            clock,
        })
    }

    /// A context with a system clock.
    pub fn with_system_clock(
        config: LedgerConfig,
        node_store: Arc<dyn NodeStore>,
        header_index: Database,
    ) -> Arc<Self> {
        Self::new(config, node_store, header_index, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn node_store(&self) -> &Arc<dyn NodeStore> {
        &self.node_store
    }

    pub fn header_index(&self) -> &Database {
        &self.header_index
    }

    pub fn node_cache(&self) -> &Arc<TreeNodeCache> {
        &self.node_cache
    }

    pub fn full_below(&self) -> &Arc<FullBelowCache> {
        &self.full_below
    }

    pub fn entry_cache(&self) -> &LedgerEntryCache {
        &self.entry_cache
    }

    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.job_queue
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current wall time clamped to the 32-bit close-time range.
    pub fn close_time_now(&self) -> u32 {
        self.clock.now_seconds().min(u64::from(u32::MAX)) as u32
    }

    /// Sweep all caches.
    pub fn sweep_caches(&self) {
        self.node_cache.sweep();
        self.full_below.sweep();
        self.entry_cache.sweep();
    }

    /// Stop background work; pending jobs are dropped and in-flight jobs
    /// observe the stop flag.
    pub fn stop(&self) {
        self.job_queue.stop();
    }

    /// Mark a ledger hash as saved. Returns `false` if it was already
    /// marked.
    pub(crate) fn mark_saved(&self, hash: Hash256) -> bool {
        self.saved_hashes.lock().insert(hash)
    }

    /// Register a sequence as save-in-flight. Returns `false` if already
    /// registered.
    pub(crate) fn register_pending_save(&self, seq: u32) -> bool {
        self.pending_saves.lock().insert(seq)
    }

    /// Retire a save-in-flight registration.
    pub(crate) fn retire_pending_save(&self, seq: u32) {
        self.pending_saves.lock().remove(&seq);
    }

    /// The sequences with saves currently in flight.
    pub fn pending_saves(&self) -> BTreeSet<u32> {
        self.pending_saves.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::ManualClock;
    use rill_nodestore::MemoryNodeStore;

    fn test_context() -> Arc<LedgerContext> {
        LedgerContext::new(
            LedgerConfig::standalone_for_test(),
            Arc::new(MemoryNodeStore::new()),
            Database::open_in_memory().unwrap(),
            Arc::new(ManualClock::new(1_000_000)),
        )
    }

    #[test]
    fn test_pending_save_registration() {
        let ctx = test_context();
        assert!(ctx.register_pending_save(5));
        assert!(!ctx.register_pending_save(5));
        assert_eq!(ctx.pending_saves().len(), 1);
        ctx.retire_pending_save(5);
        assert!(ctx.pending_saves().is_empty());
    }

    #[test]
    fn test_mark_saved_once() {
        let ctx = test_context();
        let hash = Hash256::from_bytes([1; 32]);
        assert!(ctx.mark_saved(hash));
        assert!(!ctx.mark_saved(hash));
    }

    #[test]
    fn test_close_time_now_follows_clock() {
        let ctx = test_context();
        assert_eq!(ctx.close_time_now(), 1_000_000);
    }
}
