//! The storage adapter contract.
//!
//! One trait for every backend. Wrappers (the file-backed adapters) forward
//! all operations to their inner store; their own responsibility is confined
//! to load-on-open and flush-on-close. Callers learn what a source can do
//! through [`StorageAdapter::capability`] and never downcast.

use crate::error::{CResult, Error};
use crate::storage::{
    Capability, DeleteOptions, ExecCtx, InsertOptions, QueryOptions, SourceConfig, SourceStatus,
    UpdateOptions,
};
use crate::txn::manager::UndoOp;
use crate::types::{Filter, Row, Table};

/// A uniform read/write/DDL contract over an opaque backend.
///
/// Implementations are internally synchronized: all methods take `&self` and
/// may be called from many sessions at once. Blocking is limited to file I/O
/// in the file-backed adapters.
pub trait StorageAdapter: Send + Sync {
    /// The registered source name.
    fn name(&self) -> &str;

    /// How far this source participates in MVCC.
    fn capability(&self) -> Capability;

    /// Whether rows can be pre-populated outside the transaction path.
    /// Only legal before the source is registered with the manager.
    fn bulk_load_supported(&self) -> bool {
        false
    }

    /// Called once when the source is registered with the transaction
    /// manager. Default: nothing.
    fn on_register(&self) {}

    /// Opens or loads the source. Idempotent.
    fn connect(&self, ctx: &ExecCtx) -> CResult<()>;

    /// Flushes if writable and releases resources. Idempotent.
    fn close(&self, ctx: &ExecCtx) -> CResult<()>;

    fn is_connected(&self) -> bool;

    fn is_writable(&self) -> bool;

    fn config(&self) -> &SourceConfig;

    /// The current table-name set.
    fn tables(&self, ctx: &ExecCtx) -> CResult<Vec<String>>;

    /// The schema of one table.
    fn table_info(&self, ctx: &ExecCtx, table: &str) -> CResult<Table>;

    /// DDL. Refused by read-only sources and sources without a table
    /// namespace.
    fn create_table(&self, ctx: &ExecCtx, info: Table) -> CResult<()>;

    fn drop_table(&self, ctx: &ExecCtx, table: &str) -> CResult<()>;

    /// Wipes rows, keeps the schema.
    fn truncate_table(&self, ctx: &ExecCtx, table: &str) -> CResult<()>;

    /// Returns rows matching the filters under the caller-supplied snapshot,
    /// honoring projection, order-by, offset and limit.
    fn query(&self, ctx: &ExecCtx, table: &str, options: &QueryOptions) -> CResult<Vec<Row>>;

    /// Appends rows as new versions under the caller's xid. Returns the
    /// number inserted.
    fn insert(
        &self,
        ctx: &ExecCtx,
        table: &str,
        rows: Vec<Row>,
        options: &InsertOptions,
    ) -> CResult<u64>;

    /// For each matching visible row: stamps the current version and appends
    /// a successor with the patch merged. Returns the number updated.
    fn update(
        &self,
        ctx: &ExecCtx,
        table: &str,
        filters: &[Filter],
        patch: Row,
        options: &UpdateOptions,
    ) -> CResult<u64>;

    /// Stamps matching versions as deleted. Returns the number deleted.
    fn delete(
        &self,
        ctx: &ExecCtx,
        table: &str,
        filters: &[Filter],
        options: &DeleteOptions,
    ) -> CResult<u64>;

    /// Reverse-applies one write command during rollback. Only sources at
    /// [`Capability::WriteVersion`] or above ever receive undo commands.
    fn apply_undo(&self, _ctx: &ExecCtx, _table: &str, _undo: &UndoOp) -> CResult<()> {
        Err(Error::WriteRequiresMvcc(self.name().to_owned()))
    }

    /// Pre-populates a table outside the transaction path, stamping rows
    /// with the bootstrap xid.
    fn bulk_load(&self, _ctx: &ExecCtx, table: &str, _rows: Vec<Row>) -> CResult<u64> {
        Err(Error::Schema(format!(
            "source '{}' does not support bulk load into '{}'",
            self.name(),
            table
        )))
    }

    /// Drops versions no live snapshot can see. `horizon` is the oldest xid
    /// any current or future snapshot may still need. Returns reclaimed
    /// version count. Default: nothing to vacuum.
    fn vacuum(&self, _ctx: &ExecCtx, _horizon: crate::txn::xid::Xid) -> CResult<u64> {
        Ok(0)
    }

    /// Status snapshot for INFO surfaces.
    fn status(&self, ctx: &ExecCtx) -> CResult<SourceStatus>;
}
