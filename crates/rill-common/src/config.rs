//! Engine configuration.

use serde::{Deserialize, Serialize};

/// How the node was asked to start.
///
/// The surrounding application decides this; the engine only consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    /// Start from a fresh genesis ledger.
    Fresh,
    /// Load the last validated ledger from local storage.
    Load,
    /// Load a ledger from a file.
    LoadFile,
    /// Acquire the current ledger from the network.
    Network,
    /// Replay a previously stored ledger range.
    Replay,
}

impl Default for StartupMode {
    fn default() -> Self {
        StartupMode::Network
    }
}

/// Configuration consumed by the ledger engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// How to start.
    #[serde(default)]
    pub startup_mode: StartupMode,

    /// Run without a network; consensus shortcuts are permitted.
    #[serde(default)]
    pub standalone: bool,

    /// Default base fee in drops, used until a FeeSettings entry overrides it.
    #[serde(default = "default_fee")]
    pub fee_default: u64,

    /// Fee units consumed by the reference transaction.
    #[serde(default = "default_fee_units")]
    pub transaction_fee_base: u32,

    /// Default account reserve in drops.
    #[serde(default = "default_account_reserve")]
    pub fee_account_reserve: u32,

    /// Default per-owned-entry reserve increment in drops.
    #[serde(default = "default_owner_reserve")]
    pub fee_owner_reserve: u32,

    /// Target entry count for the tree-node cache.
    #[serde(default = "default_node_cache_size")]
    pub node_cache_size: usize,

    /// Target entry lifetime for the tree-node cache, seconds.
    #[serde(default = "default_node_cache_age")]
    pub node_cache_age_secs: u64,

    /// Target entry count for the ledger-entry cache.
    #[serde(default = "default_entry_cache_size")]
    pub entry_cache_size: usize,

    /// Target entry lifetime for the ledger-entry cache, seconds.
    #[serde(default = "default_entry_cache_age")]
    pub entry_cache_age_secs: u64,

    /// Close time (seconds since epoch) from which freeze flags are
    /// enforced. `None` means never; standalone mode always enforces.
    #[serde(default)]
    pub freeze_enforce_time: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            startup_mode: StartupMode::default(),
            standalone: false,
            fee_default: default_fee(),
            transaction_fee_base: default_fee_units(),
            fee_account_reserve: default_account_reserve(),
            fee_owner_reserve: default_owner_reserve(),
            node_cache_size: default_node_cache_size(),
            node_cache_age_secs: default_node_cache_age(),
            entry_cache_size: default_entry_cache_size(),
            entry_cache_age_secs: default_entry_cache_age(),
            freeze_enforce_time: None,
        }
    }
}

fn default_fee() -> u64 {
    10
}

fn default_fee_units() -> u32 {
    10
}

fn default_account_reserve() -> u32 {
    20_000_000
}

fn default_owner_reserve() -> u32 {
    5_000_000
}

fn default_node_cache_size() -> usize {
    65536
}

fn default_node_cache_age() -> u64 {
    300
}

fn default_entry_cache_size() -> usize {
    32768
}

fn default_entry_cache_age() -> u64 {
    180
}

impl LedgerConfig {
    /// A configuration suitable for tests: standalone, tiny caches.
    pub fn standalone_for_test() -> Self {
        Self {
            startup_mode: StartupMode::Fresh,
            standalone: true,
            node_cache_size: 1024,
            entry_cache_size: 1024,
            ..Self::default()
        }
    }

    /// Whether freeze flags are enforced at the given parent close time.
    pub fn enforce_freeze(&self, parent_close_time: u64) -> bool {
        if self.standalone {
            return true;
        }
        match self.freeze_enforce_time {
            Some(at) => parent_close_time >= at,
            None => false,
        }
    }
}
