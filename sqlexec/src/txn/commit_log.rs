//! The commit log: final status per transaction, bounded by GC.
//!
//! Visibility checks consult the log whenever a version's creator or deleter
//! is not in the reader's snapshot. Entries older than the GC horizon are
//! truncated; the `oldest` watermark then answers for them: an unknown xid
//! below the watermark committed long ago, an unknown xid at or past it is
//! still in progress.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::txn::xid::{precedes, Xid, XID_BOOTSTRAP, XID_NONE};

/// Final (or current) state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TxnStatus {
    InProgress,
    Committed,
    Aborted,
}

impl TxnStatus {
    /// The only legal transitions are `InProgress → Committed` and
    /// `InProgress → Aborted`.
    pub fn can_transition_to(self, next: TxnStatus) -> bool {
        self == TxnStatus::InProgress
            && matches!(next, TxnStatus::Committed | TxnStatus::Aborted)
    }
}

/// Bounded in-memory map from xid to final status.
#[derive(Debug)]
pub struct CommitLog {
    entries: HashMap<Xid, TxnStatus>,
    /// Everything before this xid with no entry is treated as committed.
    oldest: Xid,
    /// Interior mutability so `resolve` works from a shared reference; the
    /// evaluator runs under read locks only.
    cache: Mutex<LookupCache>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(cache_size: usize) -> Self {
        CommitLog {
            entries: HashMap::new(),
            oldest: XID_NONE,
            cache: Mutex::new(LookupCache::new(cache_size)),
        }
    }

    /// Records a transaction's final status.
    pub fn set(&mut self, xid: Xid, status: TxnStatus) {
        self.entries.insert(xid, status);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(xid, status);
        }
        if self.oldest == XID_NONE || precedes(xid, self.oldest) {
            self.oldest = xid;
        }
    }

    /// The recorded status, if any.
    pub fn get(&self, xid: Xid) -> Option<TxnStatus> {
        self.entries.get(&xid).copied()
    }

    /// Resolves a status for visibility: recorded value if present, else the
    /// watermark rule. Bootstrap rows are always committed.
    pub fn resolve(&self, xid: Xid) -> TxnStatus {
        if xid == XID_BOOTSTRAP {
            return TxnStatus::Committed;
        }
        if let Ok(cache) = self.cache.lock() {
            if let Some(status) = cache.get(xid) {
                return status;
            }
        }
        let status = match self.entries.get(&xid) {
            Some(status) => *status,
            None if self.oldest != XID_NONE && precedes(xid, self.oldest) => TxnStatus::Committed,
            None => TxnStatus::InProgress,
        };
        // InProgress is transient; caching it would serve stale reads after
        // the transaction finishes.
        if status != TxnStatus::InProgress {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(xid, status);
            }
        }
        status
    }

    pub fn oldest(&self) -> Xid {
        self.oldest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Truncates entries strictly before `cutoff` and advances the
    /// watermark, so truncated xids resolve as long-committed. Returns how
    /// many entries were removed. Callers must clamp `cutoff` below every
    /// xid still active.
    pub fn gc(&mut self, cutoff: Xid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|&xid, _| !precedes(xid, cutoff));
        // Only advance an established watermark; on a log that never saw an
        // entry there is nothing the cutoff can answer for.
        if self.oldest != XID_NONE && precedes(self.oldest, cutoff) {
            self.oldest = cutoff;
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        before - self.entries.len()
    }
}

impl Default for CommitLog {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_CACHE_SIZE: usize = 512;

/// Small bounded cache of recent lookups, evicting in insertion order. Purely
/// a latency optimization; cleared wholesale on GC.
#[derive(Debug)]
struct LookupCache {
    map: HashMap<Xid, TxnStatus>,
    order: VecDeque<Xid>,
    capacity: usize,
}

impl LookupCache {
    fn new(capacity: usize) -> Self {
        LookupCache { map: HashMap::new(), order: VecDeque::new(), capacity }
    }

    fn get(&self, xid: Xid) -> Option<TxnStatus> {
        self.map.get(&xid).copied()
    }

    fn put(&mut self, xid: Xid, status: TxnStatus) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(xid, status).is_none() {
            self.order.push_back(xid);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        assert!(TxnStatus::InProgress.can_transition_to(TxnStatus::Committed));
        assert!(TxnStatus::InProgress.can_transition_to(TxnStatus::Aborted));
        assert!(!TxnStatus::Committed.can_transition_to(TxnStatus::Aborted));
        assert!(!TxnStatus::Aborted.can_transition_to(TxnStatus::Committed));
    }

    #[test]
    fn set_and_resolve() {
        let mut log = CommitLog::new();
        log.set(5, TxnStatus::Committed);
        log.set(6, TxnStatus::Aborted);

        assert_eq!(log.resolve(5), TxnStatus::Committed);
        assert_eq!(log.resolve(6), TxnStatus::Aborted);
        // Unknown at or past the watermark: in progress.
        assert_eq!(log.resolve(7), TxnStatus::InProgress);
        // Bootstrap is always committed.
        assert_eq!(log.resolve(XID_BOOTSTRAP), TxnStatus::Committed);
    }

    #[test]
    fn watermark_answers_for_truncated_entries() {
        let mut log = CommitLog::new();
        for xid in 2..20 {
            log.set(xid, TxnStatus::Committed);
        }
        let removed = log.gc(10);
        assert_eq!(removed, 8);
        assert_eq!(log.oldest(), 10);
        // 5 was truncated: resolved as long-committed.
        assert_eq!(log.get(5), None);
        assert_eq!(log.resolve(5), TxnStatus::Committed);
        // 12 survived.
        assert_eq!(log.resolve(12), TxnStatus::Committed);
        // 30 never recorded: in progress.
        assert_eq!(log.resolve(30), TxnStatus::InProgress);
    }

    #[test]
    fn oldest_tracks_lowest_set() {
        let mut log = CommitLog::new();
        log.set(9, TxnStatus::Committed);
        assert_eq!(log.oldest(), 9);
        log.set(4, TxnStatus::Committed);
        assert_eq!(log.oldest(), 4);
        log.set(12, TxnStatus::Committed);
        assert_eq!(log.oldest(), 4);
    }

    #[test]
    fn cache_evicts_in_insertion_order() {
        let mut cache = LookupCache::new(2);
        cache.put(1, TxnStatus::Committed);
        cache.put(2, TxnStatus::Committed);
        cache.put(3, TxnStatus::Aborted);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.get(2), Some(TxnStatus::Committed));
        assert_eq!(cache.get(3), Some(TxnStatus::Aborted));
    }
}
