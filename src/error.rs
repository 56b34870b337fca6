//! Error types for typed storage error handling.
//!
//! This module provides structured errors for the storage layer, covering
//! adapter lifecycle, parameter binding, backend failures, resolution and
//! replication.

use crate::adapter::AdapterKind;
use crate::capability::Capability;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Operation invoked on a handle that is not open.
    #[error("adapter '{kind}' is not open")]
    NotOpen { kind: AdapterKind },

    /// A concurrent `open` is already in flight on this handle.
    #[error("adapter '{kind}' is already opening")]
    AlreadyOpening { kind: AdapterKind },

    /// A concurrent `close` is already in flight on this handle.
    #[error("adapter '{kind}' is already closing")]
    AlreadyClosing { kind: AdapterKind },

    /// Backend refused to open.
    #[error("failed to open '{kind}' adapter: {cause}")]
    OpenFailed { kind: AdapterKind, cause: String },

    /// Parameter binding failed for a placeholder.
    #[error("cannot bind placeholder '{marker}'")]
    Bind { marker: String },

    /// Optional operation requested on a backend lacking the capability.
    #[error("adapter '{kind}' does not support '{capability}'")]
    CapabilityUnavailable {
        kind: AdapterKind,
        capability: Capability,
    },

    /// Engine-level failure, surfaced verbatim and tagged with the kind.
    #[error("'{kind}' backend error: {cause}")]
    Backend { kind: AdapterKind, cause: String },

    /// Resolver exhausted every candidate backend.
    #[error("no storage backend could be opened ({} attempted)", causes.len())]
    Resolution { causes: Vec<String> },

    /// A flat transaction is already active on this handle.
    #[error("adapter '{kind}' already has an active transaction")]
    TransactionActive { kind: AdapterKind },

    /// Commit or rollback without an active transaction.
    #[error("adapter '{kind}' has no active transaction")]
    NoTransaction { kind: AdapterKind },

    /// `merge` strategy selected but no merge function worked.
    #[error("unresolvable conflict in '{table}' for id '{id}': {reason}")]
    ConflictUnresolvable {
        table: String,
        id: String,
        reason: String,
    },

    /// Storage budget action `error` fired.
    #[error("storage budget exceeded: {used} used, {limit} allowed")]
    BudgetExceeded { used: u64, limit: u64 },

    /// A synchronized record is missing a required column.
    #[error("record in '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    /// Sync cycle verification failed under strict mode.
    #[error("row count mismatch in '{table}': local {local}, remote {remote}")]
    VerificationFailed {
        table: String,
        local: u64,
        remote: u64,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a backend error from anything displayable.
    pub fn backend(kind: AdapterKind, cause: impl std::fmt::Display) -> Self {
        Self::Backend {
            kind,
            cause: cause.to_string(),
        }
    }

    /// Create an open failure from anything displayable.
    pub fn open_failed(kind: AdapterKind, cause: impl std::fmt::Display) -> Self {
        Self::OpenFailed {
            kind,
            cause: cause.to_string(),
        }
    }

    /// Create a bind error for a placeholder marker.
    pub fn bind(marker: impl Into<String>) -> Self {
        Self::Bind {
            marker: marker.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
