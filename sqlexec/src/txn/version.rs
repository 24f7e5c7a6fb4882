//! Tuple versions and per-row version chains.
//!
//! Every write appends a version rather than overwriting in place. A version
//! carries the creating transaction in `xmin` and, once deleted or
//! superseded, the deleting transaction in `xmax`. `cmin`/`cmax` are command
//! sequence numbers inside those transactions, used for same-transaction
//! visibility. `ctid` uniquely identifies the version so undo commands can
//! reference it without holding pointers into live data.

use chrono::{DateTime, Utc};

use crate::txn::xid::{Xid, XID_NONE};
use crate::types::Row;

/// A single row version.
#[derive(Clone, Debug)]
pub struct TupleVersion {
    /// The row payload at this version.
    pub payload: Row,
    /// Creating transaction. Never `XID_NONE` after insertion.
    pub xmin: Xid,
    /// Deleting transaction, or `XID_NONE` while live.
    pub xmax: Xid,
    /// Command sequence inside the creating transaction.
    pub cmin: u32,
    /// Command sequence inside the deleting transaction.
    pub cmax: u32,
    /// Unique version identifier.
    pub ctid: u64,
    /// Shortcut flag set when the version has been superseded.
    pub expired: bool,
    /// Creation wall-clock time, used only by vacuum heuristics.
    pub created_at: DateTime<Utc>,
}

impl TupleVersion {
    pub fn new(payload: Row, xmin: Xid, cmin: u32, ctid: u64) -> Self {
        TupleVersion {
            payload,
            xmin,
            xmax: XID_NONE,
            cmin,
            cmax: 0,
            ctid,
            expired: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.xmax == XID_NONE
    }

    /// Marks the version deleted by `xid` at command `cmax`.
    pub fn stamp(&mut self, xid: Xid, cmax: u32, expired: bool) {
        self.xmax = xid;
        self.cmax = cmax;
        self.expired = expired;
    }

    /// Reverts a stamp, restoring the version to live. Used by rollback.
    pub fn clear_stamp(&mut self) {
        self.xmax = XID_NONE;
        self.cmax = 0;
        self.expired = false;
    }
}

/// A per-row sequence of versions in insertion order; the tip is last.
/// At most one version in a well-formed chain is live (`xmax == 0`).
#[derive(Clone, Debug, Default)]
pub struct VersionChain {
    versions: Vec<TupleVersion>,
}

impl VersionChain {
    pub fn new() -> Self {
        VersionChain { versions: Vec::new() }
    }

    pub fn with(version: TupleVersion) -> Self {
        VersionChain { versions: vec![version] }
    }

    pub fn push(&mut self, version: TupleVersion) {
        self.versions.push(version);
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// The most recently appended version.
    pub fn tip(&self) -> Option<&TupleVersion> {
        self.versions.last()
    }

    pub fn tip_mut(&mut self) -> Option<&mut TupleVersion> {
        self.versions.last_mut()
    }

    /// Walks from the tip backwards, which is the order visibility checks
    /// want: the newest visible version wins.
    pub fn iter_from_tip(&self) -> impl Iterator<Item = &TupleVersion> {
        self.versions.iter().rev()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TupleVersion> {
        self.versions.iter()
    }

    pub fn find(&self, ctid: u64) -> Option<&TupleVersion> {
        self.versions.iter().find(|v| v.ctid == ctid)
    }

    pub fn find_mut(&mut self, ctid: u64) -> Option<&mut TupleVersion> {
        self.versions.iter_mut().find(|v| v.ctid == ctid)
    }

    /// Removes the version `ctid`, returning it. Used when rolling back an
    /// insert.
    pub fn remove(&mut self, ctid: u64) -> Option<TupleVersion> {
        let idx = self.versions.iter().position(|v| v.ctid == ctid)?;
        Some(self.versions.remove(idx))
    }

    /// Drops versions not satisfying `keep`, returning how many went away.
    pub fn retain(&mut self, keep: impl FnMut(&TupleVersion) -> bool) -> usize {
        let before = self.versions.len();
        self.versions.retain(keep);
        before - self.versions.len()
    }

    /// Chain well-formedness: at most one live version.
    pub fn is_well_formed(&self) -> bool {
        self.versions.iter().filter(|v| v.is_live()).count() <= 1
    }
}
