//! Capability checks and downgrade decisions.
//!
//! Per query (and at begin) the engine decides whether execution can proceed
//! under MVCC, proceed with weaker semantics, or must be refused, based on
//! the capabilities of every source involved.

use crate::error::{CResult, Error};
use crate::storage::Capability;

/// How a transaction executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnMode {
    /// Full MVCC semantics.
    Mvcc,
    /// Non-MVCC execution: reads observe latest committed, writes bypass
    /// versioning on the offending sources.
    Downgraded,
}

/// How a read-only query executes. Reads never fail on capability; the worst
/// case is observing latest committed on the offender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    Snapshot,
    LatestCommitted,
}

/// Begin-time decision: every source must serve snapshot reads for the
/// transaction to run under MVCC.
pub fn decide_begin(
    participants: &[(String, Capability)],
    auto_downgrade: bool,
) -> CResult<TxnMode> {
    match participants.iter().find(|(_, cap)| *cap < Capability::ReadSnapshot) {
        None => Ok(TxnMode::Mvcc),
        Some((name, _)) if auto_downgrade => {
            log::debug!("source '{}' forces transaction downgrade", name);
            Ok(TxnMode::Downgraded)
        }
        Some((name, _)) => Err(Error::DowngradeRefused(name.clone())),
    }
}

/// Read-only query decision.
pub fn decide_read(participants: &[(String, Capability)], enable_warning: bool) -> ReadMode {
    match participants.iter().find(|(_, cap)| *cap < Capability::ReadSnapshot) {
        None => ReadMode::Snapshot,
        Some((name, cap)) => {
            if enable_warning {
                log::warn!(
                    "read over source '{}' (capability {}) proceeds without MVCC; \
                     results reflect latest committed",
                    name,
                    cap
                );
            }
            ReadMode::LatestCommitted
        }
    }
}

/// Read-write query decision: all sources must be `Full` for MVCC; anything
/// less is best-effort (when permitted) or refused.
pub fn decide_read_write(
    participants: &[(String, Capability)],
    auto_downgrade: bool,
) -> CResult<TxnMode> {
    match participants.iter().find(|(_, cap)| *cap < Capability::Full) {
        None => Ok(TxnMode::Mvcc),
        Some((name, cap)) if auto_downgrade => {
            log::warn!(
                "read-write query over source '{}' (capability {}) runs best-effort",
                name,
                cap
            );
            Ok(TxnMode::Downgraded)
        }
        Some((name, _)) => Err(Error::DowngradeRefused(name.clone())),
    }
}

/// Pure write decision: every target must at least version writes.
pub fn decide_write(participants: &[(String, Capability)]) -> CResult<()> {
    match participants.iter().find(|(_, cap)| *cap < Capability::WriteVersion) {
        None => Ok(()),
        Some((name, _)) => Err(Error::WriteRequiresMvcc(name.clone())),
    }
}
