//! The MVCC in-memory store: the reference storage adapter.
//!
//! Tables are maps from row key (primary key value, or a synthetic row id)
//! to a version chain. Writers append versions and stamp the ones they
//! supersede; readers walk each chain from the tip and take the first
//! version visible to their snapshot. Unique columns keep shadow maps from
//! value to chain keys so constraint checks and index lookups avoid full
//! scans.
//!
//! Locking: the per-table row map is the schema-level lock, individual
//! chains have their own mutex, and the unique shadow maps come last. No
//! path holds two chain locks at once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{CResult, Error};
use crate::optimizer::{select_index, IndexDescriptor, TableStatistics};
use crate::storage::adapter::StorageAdapter;
use crate::storage::{
    Capability, DeleteOptions, ExecCtx, InsertOptions, QueryOptions, SourceConfig, SourceStatus,
    UpdateOptions,
};
use crate::txn::commit_log::TxnStatus;
use crate::txn::manager::{TxnView, UndoOp, WriteCommand};
use crate::txn::version::{TupleVersion, VersionChain};
use crate::txn::visibility::is_visible;
use crate::txn::xid::{precedes, Xid, XID_BOOTSTRAP, XID_NONE};
use crate::types::{matches_all, Filter, FilterOp, Row, Table, Value};

/// A key identifying one logical row: its primary-key value or a synthetic
/// row id. Floats key by total-order bits so NaN cannot corrupt the map.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Rowid(u64),
}

impl RowKey {
    /// Keys a non-null value. NULL has no key (it never participates in
    /// uniqueness).
    pub fn from_value(value: &Value) -> Option<RowKey> {
        match value {
            Value::Null => None,
            Value::Boolean(b) => Some(RowKey::Bool(*b)),
            Value::Integer(i) => Some(RowKey::Int(*i)),
            Value::Float(f) => Some(RowKey::Float(f64_order_bits(*f))),
            Value::String(s) => Some(RowKey::Str(s.clone())),
        }
    }
}

/// Monotone mapping from f64 to u64 preserving total order.
fn f64_order_bits(f: f64) -> u64 {
    let bits = f.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

struct TableStore {
    schema: RwLock<Table>,
    rows: RwLock<BTreeMap<RowKey, Arc<Mutex<VersionChain>>>>,
    /// ctid → chain key, so undo commands resolve without scanning.
    ctid_index: RwLock<HashMap<u64, RowKey>>,
    /// Unique column → value key → chain keys carrying that value in some
    /// version. Entries are validated against visibility on use.
    uniques: RwLock<HashMap<String, BTreeMap<RowKey, BTreeSet<RowKey>>>>,
    indexes: RwLock<Vec<IndexDescriptor>>,
    next_ctid: AtomicU64,
    next_rowid: AtomicU64,
    auto_increment: AtomicI64,
}

impl TableStore {
    fn new(schema: Table, indexes: Vec<IndexDescriptor>) -> Self {
        TableStore {
            schema: RwLock::new(schema),
            rows: RwLock::new(BTreeMap::new()),
            ctid_index: RwLock::new(HashMap::new()),
            uniques: RwLock::new(HashMap::new()),
            indexes: RwLock::new(indexes),
            next_ctid: AtomicU64::new(1),
            next_rowid: AtomicU64::new(1),
            auto_increment: AtomicI64::new(0),
        }
    }

    fn allocate_ctid(&self) -> u64 {
        self.next_ctid.fetch_add(1, Ordering::SeqCst)
    }
}

/// Reference implementation of the storage contract; full MVCC on both
/// sides.
pub struct MemoryAdapter {
    cfg: SourceConfig,
    connected: AtomicBool,
    registered: AtomicBool,
    tables: RwLock<HashMap<String, Arc<TableStore>>>,
}

impl MemoryAdapter {
    pub fn new(cfg: SourceConfig) -> Self {
        MemoryAdapter {
            cfg,
            connected: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table(&self, name: &str) -> CResult<Arc<TableStore>> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        self.tables
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NoTable(name.to_owned()))
    }

    fn ensure_writable(&self) -> CResult<()> {
        if !self.cfg.writable {
            return Err(Error::ReadOnly(self.cfg.name.clone()));
        }
        Ok(())
    }

    /// Declares an additional index (restored from sidecar metadata or DDL).
    pub fn declare_index(&self, index: IndexDescriptor) -> CResult<()> {
        let store = self.table(&index.table)?;
        let mut indexes = store.indexes.write()?;
        indexes.retain(|existing| existing.name != index.name);
        indexes.push(index);
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }

    pub fn indexes_of(&self, table: &str) -> CResult<Vec<IndexDescriptor>> {
        Ok(self.table(table)?.indexes.read()?.clone())
    }

    /// The latest committed payloads of a table, generated columns excluded.
    /// Used by file-backed wrappers for write-back; assumes no transactions
    /// are in flight (flush happens at shutdown).
    pub fn live_rows(&self, ctx: &ExecCtx, table: &str) -> CResult<Vec<Row>> {
        let store = self.table(table)?;
        let schema = store.schema.read()?.clone();
        let plain: Vec<String> = schema
            .columns
            .iter()
            .filter(|c| c.generated.is_none())
            .map(|c| c.name.clone())
            .collect();
        let chains: Vec<Arc<Mutex<VersionChain>>> =
            store.rows.read()?.values().cloned().collect();
        let mut out = Vec::new();
        for chain in chains {
            ctx.check()?;
            let chain = chain.lock()?;
            if let Some(version) = latest_live(&chain) {
                out.push(version.payload.project(&plain));
            }
        }
        Ok(out)
    }

    // -- write helpers -------------------------------------------------------

    /// Primary-key (or synthetic) chain key for a normalized payload, with
    /// auto-increment settled.
    fn settle_key(&self, store: &TableStore, schema: &Table, row: &mut Row) -> CResult<RowKey> {
        if let Some(pk) = schema.primary_key() {
            let current = row.get(&pk.name).cloned().unwrap_or(Value::Null);
            if current.is_null() {
                if pk.auto_increment {
                    let next = store.auto_increment.fetch_add(1, Ordering::SeqCst) + 1;
                    row.set(pk.name.clone(), Value::Integer(next));
                    return Ok(RowKey::Int(next));
                }
                return Err(Error::NullViolation(schema.name.clone(), pk.name.clone()));
            }
            if pk.auto_increment {
                if let Value::Integer(explicit) = &current {
                    store.auto_increment.fetch_max(*explicit, Ordering::SeqCst);
                }
            }
            RowKey::from_value(&current)
                .ok_or_else(|| Error::NullViolation(schema.name.clone(), pk.name.clone()))
        } else {
            Ok(RowKey::Rowid(store.next_rowid.fetch_add(1, Ordering::SeqCst)))
        }
    }

    /// Checks a unique column value against every chain that ever carried
    /// it. A version visible to the writer is a violation; so is a live
    /// version of the writer's own (not yet visible to this statement); a
    /// live version from another in-flight transaction is a write conflict.
    /// `rows` is the caller's guard on the row map, so writers can keep it
    /// held across check and append.
    fn check_unique(
        &self,
        rows: &BTreeMap<RowKey, Arc<Mutex<VersionChain>>>,
        store: &TableStore,
        table: &str,
        column: &str,
        value: &Value,
        exclude: Option<&RowKey>,
        view: Option<&TxnView>,
    ) -> CResult<()> {
        let Some(value_key) = RowKey::from_value(value) else {
            return Ok(());
        };
        let chain_keys: Vec<RowKey> = {
            let uniques = store.uniques.read()?;
            match uniques.get(column).and_then(|by_value| by_value.get(&value_key)) {
                Some(keys) => keys.iter().cloned().collect(),
                None => return Ok(()),
            }
        };
        for chain_key in chain_keys {
            if Some(&chain_key) == exclude {
                continue;
            }
            let Some(chain) = rows.get(&chain_key) else {
                continue;
            };
            let chain = chain.lock()?;
            for version in chain.iter_from_tip() {
                let same = version
                    .payload
                    .get(column)
                    .map(|v| v.sql_eq(value))
                    .unwrap_or(false);
                if !same {
                    continue;
                }
                if visible_to(version, view)? || (version.is_live() && !owner_differs(version.xmin, view)) {
                    return Err(Error::UniqueViolation(
                        table.to_owned(),
                        column.to_owned(),
                        value.to_string(),
                    ));
                }
                if version.is_live() {
                    return Err(Error::WriteConflict(format!(
                        "uncommitted row with {}={} in '{}'",
                        column, value, table
                    )));
                }
            }
        }
        Ok(())
    }

    fn shadow_unique_values(
        &self,
        store: &TableStore,
        schema: &Table,
        chain_key: &RowKey,
        payload: &Row,
    ) -> CResult<()> {
        let mut uniques = store.uniques.write()?;
        for column in schema.columns.iter().filter(|c| c.unique && !c.primary) {
            if let Some(value_key) = payload.get(&column.name).and_then(RowKey::from_value) {
                uniques
                    .entry(column.name.clone())
                    .or_default()
                    .entry(value_key)
                    .or_default()
                    .insert(chain_key.clone());
            }
        }
        Ok(())
    }

    /// Candidate chain keys for a filter set, driven by the index selector.
    /// Point filters on the chosen index's leading column narrow the scan;
    /// everything else falls back to the full key range.
    fn candidates(
        &self,
        store: &TableStore,
        schema: &Table,
        filters: &[Filter],
        required: &[String],
    ) -> CResult<Option<Vec<RowKey>>> {
        if filters.is_empty() {
            return Ok(None);
        }
        let row_count = store.rows.read()?.len() as u64;
        let stats = TableStatistics { row_count, ..Default::default() };
        let indexes: Vec<IndexDescriptor> = store
            .indexes
            .read()?
            .iter()
            .cloned()
            .map(|mut index| {
                if index.cardinality == 0 {
                    index.cardinality = row_count;
                }
                index
            })
            .collect();
        let selection = select_index(Some(&stats), &indexes, filters, required);
        let Some(index) = selection.index else {
            return Ok(None);
        };
        log::debug!("table '{}': {}", schema.name, selection.reason);
        let Some(leading) = index.leading_column() else {
            return Ok(None);
        };
        let point = filters
            .iter()
            .find(|f| f.column == leading && matches!(f.op, FilterOp::Eq | FilterOp::In));
        let Some(point) = point else {
            return Ok(None);
        };

        let is_primary_key =
            schema.primary_key().map(|pk| pk.name == leading).unwrap_or(false);
        if index.primary && is_primary_key {
            let mut keys = BTreeSet::new();
            for operand in &point.operands {
                if let Some(key) = RowKey::from_value(operand) {
                    keys.insert(key);
                }
            }
            return Ok(Some(keys.into_iter().collect()));
        }
        if index.unique {
            let uniques = store.uniques.read()?;
            if let Some(by_value) = uniques.get(leading) {
                let mut keys = BTreeSet::new();
                for operand in &point.operands {
                    if let Some(value_key) = RowKey::from_value(operand) {
                        if let Some(chain_keys) = by_value.get(&value_key) {
                            keys.extend(chain_keys.iter().cloned());
                        }
                    }
                }
                return Ok(Some(keys.into_iter().collect()));
            }
        }
        Ok(None)
    }

    fn record_undo(
        &self,
        view: Option<&TxnView>,
        table: &str,
        op: UndoOp,
    ) -> CResult<()> {
        if let Some(view) = view {
            view.record_undo(WriteCommand {
                source: self.cfg.name.clone(),
                table: table.to_owned(),
                op,
            })?;
        }
        Ok(())
    }
}

/// First version visible to the view, walking from the tip; without a view,
/// the live tip (latest committed bypass).
fn visible_version<'c>(
    chain: &'c VersionChain,
    view: Option<&TxnView>,
) -> CResult<Option<&'c TupleVersion>> {
    match view {
        Some(view) => view.with_commit_log(|log| {
            chain
                .iter_from_tip()
                .find(|v| is_visible(v, &view.snapshot, log, view.reader()))
        }),
        None => Ok(latest_live(chain)),
    }
}

fn latest_live(chain: &VersionChain) -> Option<&TupleVersion> {
    chain.iter_from_tip().find(|v| v.is_live() && !v.expired)
}

fn visible_to(version: &TupleVersion, view: Option<&TxnView>) -> CResult<bool> {
    match view {
        Some(view) => view.with_commit_log(|log| {
            is_visible(version, &view.snapshot, log, view.reader())
        }),
        None => Ok(version.is_live() && !version.expired),
    }
}

fn owner_differs(xid: Xid, view: Option<&TxnView>) -> bool {
    match view {
        Some(view) => xid != view.xid,
        None => xid != XID_BOOTSTRAP,
    }
}

fn writer_identity(view: Option<&TxnView>) -> CResult<(Xid, u32)> {
    match view {
        Some(view) => {
            if !view.can_write() {
                return Err(Error::InvalidTxnState(
                    "write attempted through a read-only view".into(),
                ));
            }
            Ok((view.xid, view.command_seq))
        }
        None => Ok((XID_BOOTSTRAP, 0)),
    }
}

/// Refuses to stamp a version another transaction already stamped, unless
/// that transaction aborted. This is where the losing writer of a race
/// surfaces.
fn check_stamp_conflict(target: &TupleVersion, writer: Xid, view: &TxnView) -> CResult<()> {
    if target.xmax == XID_NONE || target.xmax == writer {
        return Ok(());
    }
    let status = view.with_commit_log(|log| log.resolve(target.xmax))?;
    match status {
        TxnStatus::Aborted => Ok(()),
        _ => Err(Error::WriteConflict(format!(
            "row version {} already stamped by transaction {}",
            target.ctid, target.xmax
        ))),
    }
}

impl std::fmt::Display for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "memory:{}", self.cfg.name)
    }
}

impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn capability(&self) -> Capability {
        Capability::Full
    }

    fn bulk_load_supported(&self) -> bool {
        !self.registered.load(Ordering::SeqCst)
    }

    fn on_register(&self) {
        self.registered.store(true, Ordering::SeqCst);
    }

    fn connect(&self, _ctx: &ExecCtx) -> CResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, _ctx: &ExecCtx) -> CResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_writable(&self) -> bool {
        self.cfg.writable
    }

    fn config(&self) -> &SourceConfig {
        &self.cfg
    }

    fn tables(&self, _ctx: &ExecCtx) -> CResult<Vec<String>> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        let mut names: Vec<String> = self.tables.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn table_info(&self, _ctx: &ExecCtx, table: &str) -> CResult<Table> {
        let store = self.table(table)?;
        let schema = store.schema.read()?;
        Ok(schema.clone())
    }

    fn create_table(&self, _ctx: &ExecCtx, info: Table) -> CResult<()> {
        self.ensure_writable()?;
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        info.validate()?;
        let mut tables = self.tables.write()?;
        if tables.contains_key(&info.name) {
            return Err(Error::AlreadyExists(info.name));
        }

        // Constraint columns surface as index descriptors for the selector.
        let mut indexes = Vec::new();
        if let Some(pk) = info.primary_key() {
            indexes.push(
                IndexDescriptor::btree("primary", info.name.clone(), vec![pk.name.clone()])
                    .primary(),
            );
        }
        for column in info.columns.iter().filter(|c| c.unique && !c.primary) {
            indexes.push(
                IndexDescriptor::btree(
                    format!("idx_{}", column.name),
                    info.name.clone(),
                    vec![column.name.clone()],
                )
                .unique(),
            );
        }
        indexes.sort_by(|a, b| a.name.cmp(&b.name));

        let name = info.name.clone();
        tables.insert(name, Arc::new(TableStore::new(info, indexes)));
        Ok(())
    }

    fn drop_table(&self, _ctx: &ExecCtx, table: &str) -> CResult<()> {
        self.ensure_writable()?;
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        let mut tables = self.tables.write()?;
        tables.remove(table).ok_or_else(|| Error::NoTable(table.to_owned()))?;
        Ok(())
    }

    fn truncate_table(&self, _ctx: &ExecCtx, table: &str) -> CResult<()> {
        self.ensure_writable()?;
        let store = self.table(table)?;
        let mut rows = store.rows.write()?;
        rows.clear();
        store.ctid_index.write()?.clear();
        store.uniques.write()?.clear();
        store.auto_increment.store(0, Ordering::SeqCst);
        store.next_rowid.store(1, Ordering::SeqCst);
        Ok(())
    }

    fn query(&self, ctx: &ExecCtx, table: &str, options: &QueryOptions) -> CResult<Vec<Row>> {
        ctx.check()?;
        let store = self.table(table)?;
        let schema = store.schema.read()?.clone();
        for filter in &options.filters {
            if schema.column(&filter.column).is_none() {
                return Err(Error::Filter(format!(
                    "unknown filter column '{}' on '{}'",
                    filter.column, table
                )));
            }
        }

        let required = options
            .projection
            .clone()
            .unwrap_or_else(|| schema.column_names());
        let candidates = self.candidates(&store, &schema, &options.filters, &required)?;

        let chains: Vec<Arc<Mutex<VersionChain>>> = {
            let rows = store.rows.read()?;
            match &candidates {
                Some(keys) => keys.iter().filter_map(|k| rows.get(k).cloned()).collect(),
                None => rows.values().cloned().collect(),
            }
        };

        let view = options.txn.as_ref();
        let mut out = Vec::new();
        for chain in chains {
            ctx.check()?;
            let row = {
                let chain = chain.lock()?;
                visible_version(&chain, view)?.map(|v| v.payload.clone())
            };
            let Some(mut row) = row else {
                continue;
            };
            schema.materialize_virtual(&mut row)?;
            if matches_all(&options.filters, &row)? {
                out.push(row);
            }
        }

        if !options.order_by.is_empty() {
            out.sort_by(|a, b| {
                for order in &options.order_by {
                    let left = a.get(&order.column).unwrap_or(&Value::Null);
                    let right = b.get(&order.column).unwrap_or(&Value::Null);
                    let ordering = left.cmp_order(right);
                    if !ordering.is_eq() {
                        return if order.desc { ordering.reverse() } else { ordering };
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let offset = options.offset.max(0) as usize;
        let limit = options.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let mut out: Vec<Row> = out.into_iter().skip(offset).take(limit).collect();

        if let Some(projection) = &options.projection {
            out = out.into_iter().map(|row| row.project(projection)).collect();
        }
        Ok(out)
    }

    fn insert(
        &self,
        ctx: &ExecCtx,
        table: &str,
        rows: Vec<Row>,
        options: &InsertOptions,
    ) -> CResult<u64> {
        ctx.check()?;
        self.ensure_writable()?;
        let store = self.table(table)?;
        let schema = store.schema.read()?.clone();
        let view = options.txn.as_ref();
        let (writer, command_seq) = writer_identity(view)?;

        let mut inserted = 0u64;
        'rows: for row in rows {
            ctx.check()?;
            let mut payload = schema.normalize_row(&row)?;
            let chain_key = self.settle_key(&store, &schema, &mut payload)?;
            schema.materialize_stored(&mut payload)?;
            schema.check_not_null(&payload)?;

            // The row map stays write-locked from the constraint checks to
            // the append, so two inserts cannot race past the same check.
            let ctid = {
                let mut rows = store.rows.write()?;

                // Primary-key uniqueness against the existing chain, if any.
                if let Some(existing) = rows.get(&chain_key) {
                    let chain = existing.lock()?;
                    for version in chain.iter_from_tip() {
                        let duplicate = visible_to(version, view)?
                            || (version.is_live() && !owner_differs(version.xmin, view));
                        if duplicate {
                            if options.ignore_duplicates {
                                continue 'rows;
                            }
                            let pk = schema
                                .primary_key()
                                .map(|c| c.name.clone())
                                .unwrap_or_else(|| "rowid".into());
                            let value = payload.get(&pk).cloned().unwrap_or(Value::Null);
                            return Err(Error::UniqueViolation(
                                table.to_owned(),
                                pk,
                                value.to_string(),
                            ));
                        }
                        if version.is_live() {
                            return Err(Error::WriteConflict(format!(
                                "uncommitted row with the same key in '{}'",
                                table
                            )));
                        }
                    }
                }

                // Secondary unique columns.
                for column in schema.columns.iter().filter(|c| c.unique && !c.primary) {
                    if let Some(value) = payload.get(&column.name) {
                        let checked = self.check_unique(
                            &rows,
                            &store,
                            table,
                            &column.name,
                            value,
                            Some(&chain_key),
                            view,
                        );
                        match checked {
                            Ok(()) => {}
                            Err(Error::UniqueViolation(..)) if options.ignore_duplicates => {
                                continue 'rows;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }

                let ctid = store.allocate_ctid();
                let version = TupleVersion::new(payload.clone(), writer, command_seq, ctid);
                let chain = rows
                    .entry(chain_key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(VersionChain::new())));
                chain.lock()?.push(version);
                ctid
            };
            store.ctid_index.write()?.insert(ctid, chain_key.clone());
            self.shadow_unique_values(&store, &schema, &chain_key, &payload)?;
            self.record_undo(view, table, UndoOp::DropCreated { ctid })?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn update(
        &self,
        ctx: &ExecCtx,
        table: &str,
        filters: &[Filter],
        patch: Row,
        options: &UpdateOptions,
    ) -> CResult<u64> {
        ctx.check()?;
        self.ensure_writable()?;
        let store = self.table(table)?;
        let schema = store.schema.read()?.clone();
        let view = options.txn.as_ref();
        let (writer, command_seq) = writer_identity(view)?;

        // Validate the patch up front.
        for (column, value) in patch.iter() {
            let Some(def) = schema.column(column) else {
                return Err(Error::NoColumn(column.to_owned()));
            };
            if def.generated.is_some() {
                return Err(Error::Schema(format!(
                    "column '{}' is generated and cannot be assigned",
                    column
                )));
            }
            if def.primary {
                return Err(Error::Schema(format!(
                    "updating primary-key column '{}' is not supported",
                    column
                )));
            }
            if !value.is_null() && !value.fits(def.datatype) {
                return Err(Error::Schema(format!(
                    "value {} does not fit column '{}.{}' ({})",
                    value, table, column, def.datatype
                )));
            }
        }

        let required = schema.column_names();
        let candidates = self.candidates(&store, &schema, filters, &required)?;
        let targets: Vec<(RowKey, Arc<Mutex<VersionChain>>)> = {
            let rows = store.rows.read()?;
            match &candidates {
                Some(keys) => keys
                    .iter()
                    .filter_map(|k| rows.get(k).map(|c| (k.clone(), c.clone())))
                    .collect(),
                None => rows.iter().map(|(k, c)| (k.clone(), c.clone())).collect(),
            }
        };

        let mut updated = 0u64;
        for (chain_key, chain_arc) in targets {
            ctx.check()?;

            // Read the visible target without holding the lock across the
            // unique checks (which lock other chains).
            let target = {
                let chain = chain_arc.lock()?;
                visible_version(&chain, view)?.map(|v| (v.ctid, v.payload.clone()))
            };
            let Some((target_ctid, target_payload)) = target else {
                continue;
            };
            let mut current = target_payload.clone();
            schema.materialize_virtual(&mut current)?;
            if !matches_all(filters, &current)? {
                continue;
            }

            let mut successor = target_payload.merged(&patch);
            schema.materialize_stored(&mut successor)?;
            schema.check_not_null(&successor)?;

            {
                let rows = store.rows.read()?;
                for column in schema.columns.iter().filter(|c| c.unique && !c.primary) {
                    let changed =
                        successor.get(&column.name) != target_payload.get(&column.name);
                    if changed {
                        if let Some(value) = successor.get(&column.name) {
                            self.check_unique(
                                &rows,
                                &store,
                                table,
                                &column.name,
                                value,
                                Some(&chain_key),
                                view,
                            )?;
                        }
                    }
                }
            }

            let ctid = store.allocate_ctid();
            {
                let mut chain = chain_arc.lock()?;
                let Some(target) = chain.find_mut(target_ctid) else {
                    // The version vanished between reads: a racing rollback
                    // or vacuum. Treat as a conflict.
                    return Err(Error::WriteConflict(format!(
                        "row in '{}' changed during update",
                        table
                    )));
                };
                if let Some(view) = view {
                    check_stamp_conflict(target, writer, view)?;
                }
                target.stamp(writer, command_seq, true);
                chain.push(TupleVersion::new(successor.clone(), writer, command_seq, ctid));
            }
            self.record_undo(view, table, UndoOp::ClearStamp { ctid: target_ctid })?;
            store.ctid_index.write()?.insert(ctid, chain_key.clone());
            self.shadow_unique_values(&store, &schema, &chain_key, &successor)?;
            self.record_undo(view, table, UndoOp::DropCreated { ctid })?;
            updated += 1;
        }
        Ok(updated)
    }

    fn delete(
        &self,
        ctx: &ExecCtx,
        table: &str,
        filters: &[Filter],
        options: &DeleteOptions,
    ) -> CResult<u64> {
        ctx.check()?;
        self.ensure_writable()?;
        let store = self.table(table)?;
        let schema = store.schema.read()?.clone();
        let view = options.txn.as_ref();
        let (writer, command_seq) = writer_identity(view)?;

        let required = schema.column_names();
        let candidates = self.candidates(&store, &schema, filters, &required)?;
        let targets: Vec<Arc<Mutex<VersionChain>>> = {
            let rows = store.rows.read()?;
            match &candidates {
                Some(keys) => keys.iter().filter_map(|k| rows.get(k).cloned()).collect(),
                None => rows.values().cloned().collect(),
            }
        };

        let mut deleted = 0u64;
        for chain_arc in targets {
            ctx.check()?;
            let mut chain = chain_arc.lock()?;
            let target_ctid = {
                let Some(version) = visible_version(&chain, view)? else {
                    continue;
                };
                let mut current = version.payload.clone();
                let ctid = version.ctid;
                schema.materialize_virtual(&mut current)?;
                if !matches_all(filters, &current)? {
                    continue;
                }
                ctid
            };
            let Some(target) = chain.find_mut(target_ctid) else {
                continue;
            };
            if let Some(view) = view {
                if !options.force {
                    check_stamp_conflict(target, writer, view)?;
                }
            }
            target.stamp(writer, command_seq, true);
            drop(chain);
            self.record_undo(view, table, UndoOp::ClearStamp { ctid: target_ctid })?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn apply_undo(&self, _ctx: &ExecCtx, table: &str, undo: &UndoOp) -> CResult<()> {
        let store = self.table(table)?;
        match undo {
            UndoOp::DropCreated { ctid } => {
                let chain_key = {
                    let ctids = store.ctid_index.read()?;
                    ctids.get(ctid).cloned()
                };
                let Some(chain_key) = chain_key else {
                    return Ok(()); // already vacuumed
                };
                let mut rows = store.rows.write()?;
                let empty = if let Some(chain_arc) = rows.get(&chain_key) {
                    let mut chain = chain_arc.lock()?;
                    chain.remove(*ctid);
                    chain.is_empty()
                } else {
                    false
                };
                if empty {
                    rows.remove(&chain_key);
                }
                store.ctid_index.write()?.remove(ctid);
                Ok(())
            }
            UndoOp::ClearStamp { ctid } => {
                let chain_key = {
                    let ctids = store.ctid_index.read()?;
                    ctids.get(ctid).cloned()
                };
                let Some(chain_key) = chain_key else {
                    return Ok(());
                };
                let chain_arc = {
                    let rows = store.rows.read()?;
                    rows.get(&chain_key).cloned()
                };
                if let Some(chain_arc) = chain_arc {
                    let mut chain = chain_arc.lock()?;
                    if let Some(version) = chain.find_mut(*ctid) {
                        version.clear_stamp();
                    }
                }
                Ok(())
            }
        }
    }

    fn bulk_load(&self, ctx: &ExecCtx, table: &str, rows: Vec<Row>) -> CResult<u64> {
        if !self.bulk_load_supported() {
            return Err(Error::Schema(format!(
                "source '{}' is already registered; bulk load is closed",
                self.cfg.name
            )));
        }
        // Bulk rows enter as bootstrap versions through the normal insert
        // machinery, bypassing the transaction path.
        self.insert(ctx, table, rows, &InsertOptions::default())
    }

    fn vacuum(&self, ctx: &ExecCtx, horizon: Xid) -> CResult<u64> {
        if !self.is_connected() {
            return Ok(0);
        }
        let stores: Vec<Arc<TableStore>> = self.tables.read()?.values().cloned().collect();
        let mut reclaimed = 0u64;
        for store in stores {
            ctx.check()?;
            let schema = store.schema.read()?.clone();
            let mut rows = store.rows.write()?;
            let mut dead_keys = Vec::new();
            let mut removed_ctids = Vec::new();
            for (key, chain_arc) in rows.iter() {
                let mut chain = chain_arc.lock()?;
                let removed = chain.retain(|v| {
                    let dead = v.expired && v.xmax != XID_NONE && precedes(v.xmax, horizon);
                    if dead {
                        removed_ctids.push(v.ctid);
                    }
                    !dead
                });
                reclaimed += removed as u64;
                if chain.is_empty() {
                    dead_keys.push(key.clone());
                }
            }
            for key in dead_keys {
                rows.remove(&key);
            }
            if !removed_ctids.is_empty() {
                let mut ctids = store.ctid_index.write()?;
                for ctid in removed_ctids {
                    ctids.remove(&ctid);
                }
            }
            // Rebuild the shadow maps from surviving versions.
            let mut uniques: HashMap<String, BTreeMap<RowKey, BTreeSet<RowKey>>> =
                HashMap::new();
            for (key, chain_arc) in rows.iter() {
                let chain = chain_arc.lock()?;
                for version in chain.iter() {
                    for column in schema.columns.iter().filter(|c| c.unique && !c.primary) {
                        if let Some(value_key) =
                            version.payload.get(&column.name).and_then(RowKey::from_value)
                        {
                            uniques
                                .entry(column.name.clone())
                                .or_default()
                                .entry(value_key)
                                .or_default()
                                .insert(key.clone());
                        }
                    }
                }
            }
            *store.uniques.write()? = uniques;
        }
        Ok(reclaimed)
    }

    fn status(&self, ctx: &ExecCtx) -> CResult<SourceStatus> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        let stores: Vec<Arc<TableStore>> = self.tables.read()?.values().cloned().collect();
        let mut live_rows = 0u64;
        let mut versions = 0u64;
        for store in &stores {
            ctx.check()?;
            let chains: Vec<Arc<Mutex<VersionChain>>> =
                store.rows.read()?.values().cloned().collect();
            for chain in chains {
                let chain = chain.lock()?;
                versions += chain.len() as u64;
                if latest_live(&chain).is_some() {
                    live_rows += 1;
                }
            }
        }
        Ok(SourceStatus {
            name: self.cfg.name.clone(),
            tables: stores.len() as u64,
            live_rows,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SourceType;
    use crate::txn::manager::{ManagerConfig, TransactionManager};
    use crate::txn::snapshot::IsolationLevel;
    use crate::types::{Column, DataType, GeneratedKind};
    use pretty_assertions::assert_eq;

    fn people_schema() -> Table {
        Table::new(
            "people",
            vec![
                Column::new("id", DataType::Integer).primary(),
                Column::new("name", DataType::String),
            ],
        )
    }

    fn people_adapter() -> MemoryAdapter {
        let adapter = MemoryAdapter::new(SourceConfig::new("mem", SourceType::Memory));
        adapter.connect(&ExecCtx::none()).unwrap();
        adapter.create_table(&ExecCtx::none(), people_schema()).unwrap();
        let rows: Vec<Row> = [(1, "Alice"), (2, "Bob"), (3, "Carol")]
            .iter()
            .map(|(id, name)| {
                Row::from_pairs([
                    ("id", Value::Integer(*id)),
                    ("name", Value::String((*name).into())),
                ])
            })
            .collect();
        adapter.bulk_load(&ExecCtx::none(), "people", rows).unwrap();
        adapter
    }

    super::super::tests::test_adapter!(people_adapter());

    fn engine() -> (std::sync::Arc<TransactionManager>, std::sync::Arc<MemoryAdapter>) {
        let manager = TransactionManager::new(ManagerConfig::default());
        let adapter = std::sync::Arc::new(MemoryAdapter::new(SourceConfig::new(
            "mem",
            SourceType::Memory,
        )));
        adapter.connect(&ExecCtx::none()).unwrap();
        adapter
            .create_table(
                &ExecCtx::none(),
                Table::new(
                    "users",
                    vec![
                        Column::new("id", DataType::Integer).primary(),
                        Column::new("name", DataType::String),
                    ],
                ),
            )
            .unwrap();
        manager.register_source(adapter.clone()).unwrap();
        (manager, adapter)
    }

    fn caps() -> Vec<(String, Capability)> {
        vec![("mem".to_string(), Capability::Full)]
    }

    fn user(id: i64, name: &str) -> Row {
        Row::from_pairs([("id", Value::Integer(id)), ("name", Value::String(name.into()))])
    }

    fn query_all(
        adapter: &MemoryAdapter,
        view: Option<crate::txn::manager::TxnView>,
    ) -> Vec<Row> {
        let options = QueryOptions { txn: view, ..Default::default() };
        adapter.query(&ExecCtx::none(), "users", &options).unwrap()
    }

    #[test]
    fn basic_read_write() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        let t1 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t1).unwrap().unwrap();
        let opts = InsertOptions { txn: Some(view), ..Default::default() };
        assert_eq!(adapter.insert(&ctx, "users", vec![user(1, "Alice")], &opts).unwrap(), 1);
        manager.commit(t1).unwrap();

        let t2 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t2).unwrap().unwrap();
        let rows = query_all(&adapter, Some(view));
        assert_eq!(rows, vec![user(1, "Alice")]);
        manager.commit(t2).unwrap();
    }

    #[test]
    fn reader_isolation_across_update() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        // Seed committed state {1, "A"}.
        let seed = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&seed).unwrap().unwrap();
        adapter
            .insert(&ctx, "users", vec![user(1, "A")], &InsertOptions {
                txn: Some(view),
                ..Default::default()
            })
            .unwrap();
        manager.commit(seed).unwrap();

        // T1 snapshots before T2's update commits.
        let t1 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();

        let t2 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view2 = manager.view(&t2).unwrap().unwrap();
        let patch = Row::from_pairs([("name", Value::String("B".into()))]);
        let updated = adapter
            .update(&ctx, "users", &[Filter::eq("id", Value::Integer(1))], patch, &UpdateOptions {
                txn: Some(view2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated, 1);
        manager.commit(t2).unwrap();

        // T1 still sees the old value.
        let view1 = manager.view(&t1).unwrap().unwrap();
        assert_eq!(query_all(&adapter, Some(view1)), vec![user(1, "A")]);
        manager.commit(t1).unwrap();

        // A fresh reader sees the new value.
        let t3 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view3 = manager.view(&t3).unwrap().unwrap();
        assert_eq!(query_all(&adapter, Some(view3)), vec![user(1, "B")]);
        manager.commit(t3).unwrap();
    }

    #[test]
    fn rollback_leaves_no_trace() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        let t1 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t1).unwrap().unwrap();
        adapter
            .insert(&ctx, "users", vec![user(2, "Bob")], &InsertOptions {
                txn: Some(view),
                ..Default::default()
            })
            .unwrap();
        manager.rollback(t1).unwrap();

        let t2 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t2).unwrap().unwrap();
        assert!(query_all(&adapter, Some(view)).is_empty());
        manager.commit(t2).unwrap();

        // The version was physically removed by the undo.
        let status = adapter.status(&ctx).unwrap();
        assert_eq!(status.versions, 0);
    }

    #[test]
    fn rollback_restores_updated_row() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        let seed = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&seed).unwrap().unwrap();
        adapter
            .insert(&ctx, "users", vec![user(1, "A")], &InsertOptions {
                txn: Some(view),
                ..Default::default()
            })
            .unwrap();
        manager.commit(seed).unwrap();

        let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t).unwrap().unwrap();
        adapter
            .update(
                &ctx,
                "users",
                &[Filter::eq("id", Value::Integer(1))],
                Row::from_pairs([("name", Value::String("B".into()))]),
                &UpdateOptions { txn: Some(view), ..Default::default() },
            )
            .unwrap();
        manager.rollback(t).unwrap();

        let reader = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&reader).unwrap().unwrap();
        assert_eq!(query_all(&adapter, Some(view)), vec![user(1, "A")]);
        manager.commit(reader).unwrap();
    }

    #[test]
    fn repeatable_read_is_stable_within_txn() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        let seed = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&seed).unwrap().unwrap();
        adapter
            .insert(&ctx, "users", vec![user(1, "A")], &InsertOptions {
                txn: Some(view),
                ..Default::default()
            })
            .unwrap();
        manager.commit(seed).unwrap();

        let reader = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let first = query_all(&adapter, manager.view(&reader).unwrap());

        // Concurrent delete commits mid-transaction.
        let writer = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let wview = manager.view(&writer).unwrap().unwrap();
        adapter
            .delete(&ctx, "users", &[Filter::eq("id", Value::Integer(1))], &DeleteOptions {
                txn: Some(wview),
                ..Default::default()
            })
            .unwrap();
        manager.commit(writer).unwrap();

        manager.begin_statement(&reader).unwrap();
        let second = query_all(&adapter, manager.view(&reader).unwrap());
        assert_eq!(first, second);
        manager.commit(reader).unwrap();
    }

    #[test]
    fn write_conflict_fails_the_loser() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        let seed = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&seed).unwrap().unwrap();
        adapter
            .insert(&ctx, "users", vec![user(1, "A")], &InsertOptions {
                txn: Some(view),
                ..Default::default()
            })
            .unwrap();
        manager.commit(seed).unwrap();

        let t1 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let t2 = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();

        let v1 = manager.view(&t1).unwrap().unwrap();
        adapter
            .update(
                &ctx,
                "users",
                &[Filter::eq("id", Value::Integer(1))],
                Row::from_pairs([("name", Value::String("from-t1".into()))]),
                &UpdateOptions { txn: Some(v1), ..Default::default() },
            )
            .unwrap();

        // T2 sees the pre-update version but finds it stamped: conflict.
        let v2 = manager.view(&t2).unwrap().unwrap();
        let result = adapter.update(
            &ctx,
            "users",
            &[Filter::eq("id", Value::Integer(1))],
            Row::from_pairs([("name", Value::String("from-t2".into()))]),
            &UpdateOptions { txn: Some(v2), ..Default::default() },
        );
        assert!(matches!(result, Err(Error::WriteConflict(_))));

        manager.commit(t1).unwrap();
        manager.rollback(t2).unwrap();
    }

    #[test]
    fn generated_columns_on_insert_and_update() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();
        adapter
            .create_table(
                &ctx,
                Table::new(
                    "orders",
                    vec![
                        Column::new("id", DataType::Integer).primary().auto_increment(),
                        Column::new("price", DataType::Float),
                        Column::new("qty", DataType::Integer),
                        Column::new("total", DataType::Float)
                            .generated(GeneratedKind::Stored, "price * qty")
                            .unwrap(),
                        Column::new("gross", DataType::Float)
                            .generated(GeneratedKind::Virtual, "total * 1.1")
                            .unwrap(),
                    ],
                ),
            )
            .unwrap();

        let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t).unwrap().unwrap();
        adapter
            .insert(
                &ctx,
                "orders",
                vec![Row::from_pairs([
                    ("price", Value::Integer(10)),
                    ("qty", Value::Integer(2)),
                ])],
                &InsertOptions { txn: Some(view), ..Default::default() },
            )
            .unwrap();
        manager.commit(t).unwrap();

        let reader = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&reader).unwrap().unwrap();
        let rows = adapter
            .query(&ctx, "orders", &QueryOptions { txn: Some(view), ..Default::default() })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("total"), Some(&Value::Integer(20)));
        let Some(Value::Float(gross)) = rows[0].get("gross") else { panic!("no gross") };
        assert!((gross - 22.0).abs() < 1e-9);
        manager.commit(reader).unwrap();

        // Updating a dependency recomputes the stored column.
        let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t).unwrap().unwrap();
        adapter
            .update(
                &ctx,
                "orders",
                &[],
                Row::from_pairs([("price", Value::Integer(15))]),
                &UpdateOptions { txn: Some(view), ..Default::default() },
            )
            .unwrap();
        manager.commit(t).unwrap();

        let reader = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&reader).unwrap().unwrap();
        let rows = adapter
            .query(&ctx, "orders", &QueryOptions { txn: Some(view), ..Default::default() })
            .unwrap();
        assert_eq!(rows[0].get("total"), Some(&Value::Integer(30)));
        let Some(Value::Float(gross)) = rows[0].get("gross") else { panic!("no gross") };
        assert!((gross - 33.0).abs() < 1e-9);
        manager.commit(reader).unwrap();
    }

    #[test]
    fn unique_shadow_columns_are_enforced() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();
        adapter
            .create_table(
                &ctx,
                Table::new(
                    "accounts",
                    vec![
                        Column::new("id", DataType::Integer).primary(),
                        Column::new("email", DataType::String).unique(),
                    ],
                ),
            )
            .unwrap();

        let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t).unwrap().unwrap();
        let opts = InsertOptions { txn: Some(view.clone()), ..Default::default() };
        adapter
            .insert(
                &ctx,
                "accounts",
                vec![Row::from_pairs([
                    ("id", Value::Integer(1)),
                    ("email", Value::String("a@x".into())),
                ])],
                &opts,
            )
            .unwrap();
        let dup = adapter.insert(
            &ctx,
            "accounts",
            vec![Row::from_pairs([
                ("id", Value::Integer(2)),
                ("email", Value::String("a@x".into())),
            ])],
            &opts,
        );
        assert!(matches!(dup, Err(Error::UniqueViolation(_, column, _)) if column == "email"));
        manager.commit(t).unwrap();
    }

    #[test]
    fn own_writes_visible_in_later_statements() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&t).unwrap().unwrap();
        adapter
            .insert(&ctx, "users", vec![user(1, "mine")], &InsertOptions {
                txn: Some(view),
                ..Default::default()
            })
            .unwrap();

        // Next statement: the insert is visible to its own transaction.
        manager.begin_statement(&t).unwrap();
        let view = manager.view(&t).unwrap().unwrap();
        assert_eq!(query_all(&adapter, Some(view)).len(), 1);

        // Other transactions cannot see it before commit.
        let other = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let oview = manager.view(&other).unwrap().unwrap();
        assert!(query_all(&adapter, Some(oview)).is_empty());
        manager.commit(other).unwrap();
        manager.commit(t).unwrap();
    }

    #[test]
    fn vacuum_reclaims_settled_versions() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        for round in 0..3 {
            let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
            let view = manager.view(&t).unwrap().unwrap();
            if round == 0 {
                adapter
                    .insert(&ctx, "users", vec![user(1, "v0")], &InsertOptions {
                        txn: Some(view),
                        ..Default::default()
                    })
                    .unwrap();
            } else {
                adapter
                    .update(
                        &ctx,
                        "users",
                        &[],
                        Row::from_pairs([("name", Value::String(format!("v{}", round)))]),
                        &UpdateOptions { txn: Some(view), ..Default::default() },
                    )
                    .unwrap();
            }
            manager.commit(t).unwrap();
        }
        assert_eq!(adapter.status(&ctx).unwrap().versions, 3);

        // No active transactions: everything settled below the horizon.
        let reclaimed = adapter.vacuum(&ctx, manager.current_xid()).unwrap();
        assert_eq!(reclaimed, 2);
        let status = adapter.status(&ctx).unwrap();
        assert_eq!(status.versions, 1);
        assert_eq!(status.live_rows, 1);

        // The survivor is the latest payload.
        let reader = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&reader).unwrap().unwrap();
        assert_eq!(query_all(&adapter, Some(view)), vec![user(1, "v2")]);
        manager.commit(reader).unwrap();
    }

    #[test]
    fn chains_stay_well_formed() {
        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();

        for i in 0..5 {
            let t = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
            let view = manager.view(&t).unwrap().unwrap();
            if i == 0 {
                adapter
                    .insert(&ctx, "users", vec![user(1, "x")], &InsertOptions {
                        txn: Some(view),
                        ..Default::default()
                    })
                    .unwrap();
            } else {
                adapter
                    .update(
                        &ctx,
                        "users",
                        &[],
                        Row::from_pairs([("name", Value::String(format!("x{}", i)))]),
                        &UpdateOptions { txn: Some(view), ..Default::default() },
                    )
                    .unwrap();
            }
            manager.commit(t).unwrap();
        }

        let store = adapter.table("users").unwrap();
        let rows = store.rows.read().unwrap();
        for chain in rows.values() {
            let chain = chain.lock().unwrap();
            assert!(chain.is_well_formed());
            assert_eq!(chain.len(), 5);
        }
    }

    /// Runs random committed operations both on the adapter and a known-good
    /// BTreeMap, comparing the visible state after every step.
    #[test]
    fn random_ops_match_model() {
        use rand::{Rng, SeedableRng};

        const NUM_OPS: u64 = 500;
        let seed: u64 = rand::thread_rng().gen();
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        println!("seed = {}", seed);

        let (manager, adapter) = engine();
        let ctx = ExecCtx::none();
        let mut model: std::collections::BTreeMap<i64, String> = std::collections::BTreeMap::new();

        for _ in 0..NUM_OPS {
            let id = rng.gen_range(0..32i64);
            let name = format!("v{}", rng.gen_range(0..1000));
            let op = rng.gen_range(0..3);

            let txn = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
            let view = manager.view(&txn).unwrap().unwrap();
            match op {
                0 => {
                    let result = adapter.insert(
                        &ctx,
                        "users",
                        vec![user(id, &name)],
                        &InsertOptions { txn: Some(view), ..Default::default() },
                    );
                    match result {
                        Ok(1) => {
                            model.insert(id, name);
                            manager.commit(txn).unwrap();
                        }
                        Ok(n) => panic!("insert returned {}", n),
                        Err(Error::UniqueViolation(..)) => {
                            assert!(model.contains_key(&id), "spurious duplicate for {}", id);
                            manager.rollback(txn).unwrap();
                        }
                        Err(err) => panic!("insert failed: {}", err),
                    }
                }
                1 => {
                    let updated = adapter
                        .update(
                            &ctx,
                            "users",
                            &[Filter::eq("id", Value::Integer(id))],
                            Row::from_pairs([("name", Value::String(name.clone()))]),
                            &UpdateOptions { txn: Some(view), ..Default::default() },
                        )
                        .unwrap();
                    assert_eq!(updated > 0, model.contains_key(&id));
                    if updated > 0 {
                        model.insert(id, name);
                    }
                    manager.commit(txn).unwrap();
                }
                _ => {
                    let deleted = adapter
                        .delete(
                            &ctx,
                            "users",
                            &[Filter::eq("id", Value::Integer(id))],
                            &DeleteOptions { txn: Some(view), ..Default::default() },
                        )
                        .unwrap();
                    assert_eq!(deleted > 0, model.remove(&id).is_some());
                    manager.commit(txn).unwrap();
                }
            }
        }

        // Compare the final states.
        let reader = manager.begin(IsolationLevel::RepeatableRead, &caps()).unwrap();
        let view = manager.view(&reader).unwrap().unwrap();
        let rows = query_all(&adapter, Some(view));
        let expect: Vec<Row> = model
            .iter()
            .map(|(id, name)| user(*id, name))
            .collect();
        assert_eq!(rows, expect);
        manager.commit(reader).unwrap();
    }

    #[test]
    fn point_lookup_uses_primary_index() {
        let adapter = people_adapter();
        let store = adapter.table("people").unwrap();
        let schema = store.schema.read().unwrap().clone();
        let filters = vec![Filter::eq("id", Value::Integer(2))];
        let candidates = adapter
            .candidates(&store, &schema, &filters, &schema.column_names())
            .unwrap();
        assert_eq!(candidates, Some(vec![RowKey::Int(2)]));

        // Range filters fall back to the full scan.
        let filters = vec![Filter::new("id", FilterOp::Gt, Value::Integer(1))];
        let candidates = adapter
            .candidates(&store, &schema, &filters, &schema.column_names())
            .unwrap();
        assert!(candidates.is_none());
    }
}
