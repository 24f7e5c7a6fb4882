//! The MVCC transaction core.
//!
//! Concurrency control works by keeping multiple versions of every row.
//! Writers append new versions at their transaction id instead of
//! overwriting; readers evaluate each version against an immutable snapshot
//! of the transaction universe taken when their transaction (or statement)
//! began.
//!
//! VERSIONS
//! ========
//! Every version carries the creating xid (`xmin`) and, once deleted or
//! superseded, the deleting xid (`xmax`). For example, a single row updated
//! twice and finally deleted leaves a chain of three versions (x marks a
//! stamped `xmax`):
//!
//! Chain
//! v3  xmin=9  xmax=12 x    (deleted by 12)
//! v2  xmin=7  xmax=9  x    (superseded by 9)
//! v1  xmin=4  xmax=7  x    (superseded by 7)
//!
//! * A snapshot taken while 7 was in flight still sees v1.
//! * A snapshot taken after 9 committed and before 12 sees v3.
//! * After 12 commits, new snapshots see nothing; once no live snapshot can
//!   reach them, the versions are vacuum-eligible.
//!
//! ISOLATION
//! =========
//! Snapshots record the set of in-flight transactions (`xip`) and the next
//! xid (`xmax`). Versions created by anything in `xip`, at or past `xmax`,
//! or by an aborted transaction are invisible; deletions by the same are
//! ignored. The result is snapshot isolation: readers never block writers,
//! writers never block readers, and two writers racing on one row resolve
//! by write conflict, not by blocking.
//!
//! Commit makes a transaction's writes atomically visible by recording
//! `Committed` in the commit log and leaving the active set; rollback
//! reverse-applies the transaction's write commands and records `Aborted`.

pub mod commit_log;
pub mod manager;
pub mod snapshot;
pub mod version;
pub mod visibility;
pub mod xid;

pub use commit_log::{CommitLog, TxnStatus};
pub use manager::{
    GcStats, ManagerConfig, Transaction, TransactionManager, TxnView, UndoOp, WriteCommand,
};
pub use snapshot::{IsolationLevel, Snapshot};
pub use version::{TupleVersion, VersionChain};
pub use visibility::{is_visible, Reader};
pub use xid::{precedes, Xid, XidAllocator, XID_BOOTSTRAP, XID_MAX, XID_NONE};
