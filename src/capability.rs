//! Capability declarations for storage backends.
//!
//! Each adapter kind advertises a fixed set of optional features drawn from
//! a closed vocabulary. Callers either gate on `CapabilitySet::has` or use
//! the degradation helpers on [`crate::Storage`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Set of optional features a backend supports.
    ///
    /// Declared per adapter kind at compile time and exposed through the
    /// handle's [`crate::adapter::AdapterContext`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilitySet: u16 {
        /// Statements execute synchronously on the caller's thread.
        const SYNC = 1 << 0;
        /// ACID transactions via BEGIN/COMMIT/ROLLBACK.
        const TRANSACTIONS = 1 << 1;
        /// Write-ahead logging.
        const WAL = 1 << 2;
        /// File-level locking.
        const LOCKS = 1 << 3;
        /// Durable persistence across process restarts.
        const PERSISTENCE = 1 << 4;
        /// Incremental result streaming.
        const STREAMING = 1 << 5;
        /// Bulk batch execution inside one implicit transaction.
        const BATCH = 1 << 6;
        /// Prepared statements.
        const PREPARED = 1 << 7;
        /// Multiple concurrent writers.
        const CONCURRENT = 1 << 8;
        /// Native JSON column support.
        const JSON = 1 << 9;
        /// Native array column support.
        const ARRAYS = 1 << 10;
    }
}

impl CapabilitySet {
    /// Whether a single capability is present.
    pub fn has(&self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// Names of every capability in the set, for diagnostics.
    pub fn names(&self) -> Vec<&'static str> {
        Capability::ALL
            .iter()
            .filter(|c| self.has(**c))
            .map(|c| c.as_str())
            .collect()
    }
}

/// A single named capability tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Sync,
    Transactions,
    Wal,
    Locks,
    Persistence,
    Streaming,
    Batch,
    Prepared,
    Concurrent,
    Json,
    Arrays,
}

impl Capability {
    /// Every capability in declaration order.
    pub const ALL: [Capability; 11] = [
        Capability::Sync,
        Capability::Transactions,
        Capability::Wal,
        Capability::Locks,
        Capability::Persistence,
        Capability::Streaming,
        Capability::Batch,
        Capability::Prepared,
        Capability::Concurrent,
        Capability::Json,
        Capability::Arrays,
    ];

    /// The bitmask flag for this capability.
    pub fn flag(self) -> CapabilitySet {
        match self {
            Capability::Sync => CapabilitySet::SYNC,
            Capability::Transactions => CapabilitySet::TRANSACTIONS,
            Capability::Wal => CapabilitySet::WAL,
            Capability::Locks => CapabilitySet::LOCKS,
            Capability::Persistence => CapabilitySet::PERSISTENCE,
            Capability::Streaming => CapabilitySet::STREAMING,
            Capability::Batch => CapabilitySet::BATCH,
            Capability::Prepared => CapabilitySet::PREPARED,
            Capability::Concurrent => CapabilitySet::CONCURRENT,
            Capability::Json => CapabilitySet::JSON,
            Capability::Arrays => CapabilitySet::ARRAYS,
        }
    }

    /// Stable tag name.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Sync => "sync",
            Capability::Transactions => "transactions",
            Capability::Wal => "wal",
            Capability::Locks => "locks",
            Capability::Persistence => "persistence",
            Capability::Streaming => "streaming",
            Capability::Batch => "batch",
            Capability::Prepared => "prepared",
            Capability::Concurrent => "concurrent",
            Capability::Json => "json",
            Capability::Arrays => "arrays",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
