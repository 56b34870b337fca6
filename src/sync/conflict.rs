//! Conflict resolution policies.

use super::config::{ConflictStrategy, MergeFn};
use super::record::SyncRecord;
use crate::error::{Error, Result};
use crate::types::Row;

/// Suffix appended to the remote copy's id under `KeepBoth`.
const KEEP_BOTH_SUFFIX: &str = "~remote";

/// What the pull phase should write locally for a diverging pair.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Local record survives unchanged.
    KeepLocal,
    /// Remote record overwrites local.
    ApplyRemote,
    /// A merged row overwrites local.
    ApplyMerged(Row),
    /// Remote record is inserted alongside local under a derived id.
    InsertBoth(SyncRecord),
}

impl Outcome {
    /// Stable label recorded in the conflict report.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::KeepLocal => "local",
            Outcome::ApplyRemote => "remote",
            Outcome::ApplyMerged(_) => "merged",
            Outcome::InsertBoth(_) => "both",
        }
    }
}

/// Settles a diverging record pair under `strategy`.
///
/// `LastWriteWins` is deterministic: the greater stamp survives and equal
/// stamps prefer remote (equal stamps never reach here in a cycle, which
/// treats them as already-converged).
///
/// # Errors
///
/// Returns `ConflictUnresolvable` when `Merge` is selected without a
/// merge function or the merge function fails.
pub fn resolve(
    strategy: ConflictStrategy,
    merge: Option<&MergeFn>,
    table: &str,
    local: &SyncRecord,
    remote: &SyncRecord,
) -> Result<Outcome> {
    match strategy {
        ConflictStrategy::LastWriteWins => {
            if remote.updated_at >= local.updated_at {
                Ok(Outcome::ApplyRemote)
            } else {
                Ok(Outcome::KeepLocal)
            }
        }
        ConflictStrategy::LocalWins => Ok(Outcome::KeepLocal),
        ConflictStrategy::RemoteWins => Ok(Outcome::ApplyRemote),
        ConflictStrategy::Merge => {
            let merge = merge.ok_or_else(|| Error::ConflictUnresolvable {
                table: table.to_string(),
                id: local.id.clone(),
                reason: "merge strategy selected but no merge function provided".to_string(),
            })?;
            let merged =
                merge(&local.row, &remote.row).map_err(|reason| Error::ConflictUnresolvable {
                    table: table.to_string(),
                    id: local.id.clone(),
                    reason,
                })?;
            Ok(Outcome::ApplyMerged(merged))
        }
        ConflictStrategy::KeepBoth => {
            let derived = format!("{}{KEEP_BOTH_SUFFIX}", remote.id);
            Ok(Outcome::InsertBoth(remote.with_id(derived)))
        }
    }
}
