//! The visibility evaluator: is this version observable to this snapshot?
//!
//! A pure function over a version, a snapshot, and the commit log. For a
//! fixed snapshot the answer never changes for the life of that snapshot:
//! every status it consults was finalized before the snapshot was taken.
//! Side-effect free; callers invoke it under whatever lock they already hold
//! on the version, nothing more.

use crate::txn::commit_log::{CommitLog, TxnStatus};
use crate::txn::snapshot::Snapshot;
use crate::txn::version::TupleVersion;
use crate::txn::xid::{Xid, XID_NONE};

/// Identity of the reading transaction, for same-transaction visibility.
#[derive(Clone, Copy, Debug)]
pub struct Reader {
    pub xid: Xid,
    /// The reader's current command sequence number.
    pub command_seq: u32,
}

/// Decides whether `version` is visible to `snapshot`, consulting `log` for
/// transactions that finished before the snapshot was taken. `reader`, when
/// present, enables the cmin/cmax rules for the reader's own writes.
pub fn is_visible(
    version: &TupleVersion,
    snapshot: &Snapshot,
    log: &CommitLog,
    reader: Option<Reader>,
) -> bool {
    // The reader's own writes follow command-sequence rules: a version is
    // visible from the statement after the one that created it, until the
    // statement that deleted it.
    if let Some(reader) = reader {
        if reader.xid != XID_NONE && version.xmin == reader.xid {
            return version.cmin < reader.command_seq
                && (version.xmax == XID_NONE || version.cmax >= reader.command_seq);
        }
    }

    // Expired is a shortcut for "superseded by a delete this snapshot can
    // see". The stamp alone is not enough: an in-flight or aborted deleter
    // leaves the version live for everyone else.
    if version.expired && deleter_hides(version.xmax, snapshot, log) {
        return false;
    }

    // Creator checks.
    let creator = version.xmin;
    if snapshot.in_flight(creator) {
        return false;
    }
    if snapshot.from_future(creator) {
        return false;
    }
    match log.resolve(creator) {
        TxnStatus::Committed => {}
        // Aborted creators never become visible; unknown-but-recent creators
        // are conservatively treated as still in progress.
        TxnStatus::Aborted | TxnStatus::InProgress => return false,
    }

    // Deleter checks.
    let deleter = version.xmax;
    if deleter == XID_NONE {
        return true;
    }
    if let Some(reader) = reader {
        if deleter == reader.xid {
            // Deleted by the reader itself: gone from the deleting statement
            // onward.
            return version.cmax >= reader.command_seq;
        }
    }
    if snapshot.in_flight(deleter) {
        return true;
    }
    if snapshot.from_future(deleter) {
        return true;
    }
    match log.resolve(deleter) {
        TxnStatus::Aborted | TxnStatus::InProgress => true,
        TxnStatus::Committed => false,
    }
}

/// True when the deleting transaction committed before this snapshot, i.e.
/// the deletion is settled from the snapshot's point of view.
fn deleter_hides(deleter: Xid, snapshot: &Snapshot, log: &CommitLog) -> bool {
    deleter != XID_NONE
        && !snapshot.in_flight(deleter)
        && !snapshot.from_future(deleter)
        && log.resolve(deleter) == TxnStatus::Committed
}
