//! Immutable snapshots of the transaction universe.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::txn::xid::{precedes, precedes_eq, Xid};

/// Transaction isolation levels. SERIALIZABLE is accepted but executed as
/// REPEATABLE READ.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum IsolationLevel {
    #[strum(to_string = "READ UNCOMMITTED", serialize = "READ-UNCOMMITTED")]
    ReadUncommitted,
    #[strum(to_string = "READ COMMITTED", serialize = "READ-COMMITTED")]
    ReadCommitted,
    #[strum(to_string = "REPEATABLE READ", serialize = "REPEATABLE-READ")]
    RepeatableRead,
    #[strum(to_string = "SERIALIZABLE")]
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::RepeatableRead
    }
}

impl IsolationLevel {
    /// Parses a level name, falling back to the REPEATABLE READ default on
    /// anything unrecognized.
    pub fn parse_or_default(s: &str) -> Self {
        s.trim().parse().unwrap_or_default()
    }

    /// The level actually executed. SERIALIZABLE maps to REPEATABLE READ.
    pub fn effective(self) -> Self {
        match self {
            IsolationLevel::Serializable => IsolationLevel::RepeatableRead,
            other => other,
        }
    }

    /// Whether the snapshot is re-issued at each statement rather than fixed
    /// at BEGIN.
    pub fn snapshot_per_statement(self) -> bool {
        matches!(self, IsolationLevel::ReadUncommitted | IsolationLevel::ReadCommitted)
    }
}

/// An immutable view of the transaction universe at a point in time.
///
/// - `xmin`: lowest still-active xid when the snapshot was taken; versions
///   created before it are committed unless the commit log says aborted.
/// - `xmax`: the next xid to be assigned; anything at or past it is from the
///   future.
/// - `xip`: the set of xids in flight at snapshot time, defensively copied.
#[derive(Clone, Debug)]
pub struct Snapshot {
    xmin: Xid,
    xmax: Xid,
    xip: HashSet<Xid>,
    level: IsolationLevel,
    created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Builds a snapshot. Debug builds assert the §invariants: `xmin ≤ xmax`
    /// and every in-progress xid inside `[xmin, xmax)`.
    pub fn new(xmin: Xid, xmax: Xid, xip: HashSet<Xid>, level: IsolationLevel) -> Self {
        debug_assert!(precedes_eq(xmin, xmax), "snapshot xmin must not pass xmax");
        debug_assert!(
            xip.iter().all(|&x| precedes_eq(xmin, x) && precedes(x, xmax)),
            "active xids must lie in [xmin, xmax)"
        );
        Snapshot { xmin, xmax, xip, level, created_at: Utc::now() }
    }

    pub fn xmin(&self) -> Xid {
        self.xmin
    }

    pub fn xmax(&self) -> Xid {
        self.xmax
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Was `xid` in flight when this snapshot was taken?
    pub fn in_flight(&self, xid: Xid) -> bool {
        self.xip.contains(&xid)
    }

    /// Is `xid` from this snapshot's future (at or past `xmax`)?
    pub fn from_future(&self, xid: Xid) -> bool {
        !precedes(xid, self.xmax)
    }

    pub fn active_count(&self) -> usize {
        self.xip.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_defaults_to_repeatable_read() {
        assert_eq!(
            IsolationLevel::parse_or_default("read committed"),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            IsolationLevel::parse_or_default("SERIALIZABLE"),
            IsolationLevel::Serializable
        );
        assert_eq!(IsolationLevel::parse_or_default("bogus"), IsolationLevel::RepeatableRead);
        assert_eq!(IsolationLevel::parse_or_default(""), IsolationLevel::RepeatableRead);
    }

    #[test]
    fn serializable_runs_as_repeatable_read() {
        assert_eq!(IsolationLevel::Serializable.effective(), IsolationLevel::RepeatableRead);
        assert!(!IsolationLevel::Serializable.snapshot_per_statement());
        assert!(IsolationLevel::ReadCommitted.snapshot_per_statement());
    }

    #[test]
    fn flight_and_future() {
        let snap = Snapshot::new(3, 7, [3, 5].into_iter().collect(), IsolationLevel::default());
        assert!(snap.in_flight(3));
        assert!(snap.in_flight(5));
        assert!(!snap.in_flight(4));
        assert!(snap.from_future(7));
        assert!(snap.from_future(8));
        assert!(!snap.from_future(6));
    }
}
