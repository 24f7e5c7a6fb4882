//! Transaction identifiers.
//!
//! XIDs are 32-bit and circular: the id space is a ring, and "x precedes y"
//! means the distance from x to y, walking forward around the ring, is less
//! than half the space. Three values are reserved: [`XID_NONE`] marks "no
//! transaction", [`XID_BOOTSTRAP`] stamps rows loaded outside any transaction,
//! and [`XID_MAX`] is never assigned. Allocation is strictly monotonic until
//! wrap, at which point it resumes just past the reserved prefix.

use std::sync::atomic::{AtomicU32, Ordering};

/// A transaction identifier.
pub type Xid = u32;

/// No transaction.
pub const XID_NONE: Xid = 0;
/// Rows created by bulk load, before any transaction existed.
pub const XID_BOOTSTRAP: Xid = 1;
/// Upper reserved bound, never allocated.
pub const XID_MAX: Xid = u32::MAX;

const HALF_RANGE: u32 = 1 << 31;

/// Ring ordering: true when `x` comes strictly before `y` on the xid ring.
/// Reflexively false; total over any window narrower than half the ring.
pub fn precedes(x: Xid, y: Xid) -> bool {
    x != y && y.wrapping_sub(x) < HALF_RANGE
}

/// `precedes` or equal.
pub fn precedes_eq(x: Xid, y: Xid) -> bool {
    x == y || precedes(x, y)
}

/// The ring minimum of a non-empty iterator of xids.
pub fn ring_min<I: IntoIterator<Item = Xid>>(xids: I) -> Option<Xid> {
    xids.into_iter().reduce(|a, b| if precedes(b, a) { b } else { a })
}

/// Monotonic xid allocator with wrap handling. Lock-free so `current` can be
/// read from anywhere.
pub struct XidAllocator {
    next: AtomicU32,
}

impl XidAllocator {
    pub fn new() -> Self {
        XidAllocator { next: AtomicU32::new(XID_BOOTSTRAP + 1) }
    }

    /// The next xid that will be assigned.
    pub fn peek_next(&self) -> Xid {
        normalize(self.next.load(Ordering::SeqCst))
    }

    /// Allocates the next xid, skipping reserved values on wrap.
    pub fn allocate(&self) -> Xid {
        loop {
            let current = self.next.load(Ordering::SeqCst);
            let candidate = normalize(current);
            let next = candidate.wrapping_add(1);
            if self
                .next
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// Residual id space before the counter wraps. Drives the wrap warning.
    pub fn remaining_before_wrap(&self) -> u32 {
        XID_MAX - self.next.load(Ordering::SeqCst)
    }
}

impl Default for XidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Skips the reserved values None, Bootstrap and Max.
fn normalize(xid: Xid) -> Xid {
    match xid {
        XID_MAX => XID_BOOTSTRAP + 1,
        XID_NONE => XID_BOOTSTRAP + 1,
        XID_BOOTSTRAP => XID_BOOTSTRAP + 1,
        other => other,
    }
}
