//! The transaction manager: xid allocation, snapshot issuance, active-set
//! bookkeeping, commit/rollback, and the GC loop.
//!
//! Transactions are opaque handles: an xid plus mode, nothing else. All per
//! transaction state (snapshot, command sequence, undo log) lives in side
//! tables owned by the manager, so commit and rollback never traverse live
//! data structures under mutation. Write commands are value objects holding
//! the prior version's ctid.
//!
//! A single manager-wide RwLock guards the active set and snapshot cache;
//! begin/commit/rollback/GC take it for writing, introspection for reading.
//! The xid counter is atomic, so `current_xid` is lock-free.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{CResult, Error};
use crate::storage::adapter::StorageAdapter;
use crate::storage::downgrade::{decide_begin, TxnMode};
use crate::storage::{Capability, ExecCtx};
use crate::txn::commit_log::{CommitLog, TxnStatus};
use crate::txn::snapshot::{IsolationLevel, Snapshot};
use crate::txn::visibility::Reader;
use crate::txn::xid::{ring_min, Xid, XidAllocator, XID_NONE};

/// Commit-log truncation keeps this many xids of slack below the oldest
/// active transaction.
const COMMIT_LOG_SAFETY_WINDOW: u32 = 4096;

/// Manager configuration. Defaults match production settings.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Emit a log line when a transaction is downgraded.
    pub enable_warning: bool,
    /// Permit writes against non-MVCC sources with weaker semantics.
    pub auto_downgrade: bool,
    /// Period of the background GC sweep.
    pub gc_interval: Duration,
    /// Snapshot / commit-log retention floor.
    pub gc_age_threshold: Duration,
    /// Residual xid space at which a wrap warning is logged.
    pub xid_wrap_threshold: u32,
    /// Hard cap on concurrently active transactions.
    pub max_active_txns: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            enable_warning: true,
            auto_downgrade: true,
            gc_interval: Duration::from_secs(5 * 60),
            gc_age_threshold: Duration::from_secs(60 * 60),
            xid_wrap_threshold: 100_000,
            max_active_txns: 10_000,
        }
    }
}

/// A live transaction handle. Deliberately not `Clone`: commit and rollback
/// consume the handle, so a finished transaction cannot be reused.
#[derive(Debug)]
pub struct Transaction {
    xid: Xid,
    level: IsolationLevel,
    mvcc: bool,
}

impl Transaction {
    pub fn xid(&self) -> Xid {
        self.xid
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    /// False for transactions downgraded to non-MVCC execution.
    pub fn is_mvcc(&self) -> bool {
        self.mvcc
    }
}

/// One reverse-applicable write step.
#[derive(Clone, Debug, PartialEq)]
pub enum UndoOp {
    /// Remove a version this transaction created.
    DropCreated { ctid: u64 },
    /// Clear the `xmax`/`expired` stamp this transaction put on a version.
    ClearStamp { ctid: u64 },
}

/// A write command enqueued by a transaction: which source and table it hit,
/// and how to take it back.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteCommand {
    pub source: String,
    pub table: String,
    pub op: UndoOp,
}

/// Everything an adapter needs to evaluate visibility for one statement:
/// reader identity, the snapshot, and a handle on the commit log. Cheap to
/// clone; adapters record their undo steps through it.
#[derive(Clone)]
pub struct TxnView {
    pub xid: Xid,
    pub command_seq: u32,
    pub snapshot: Arc<Snapshot>,
    commit_log: Arc<RwLock<CommitLog>>,
    undo: Option<Arc<Mutex<Vec<WriteCommand>>>>,
}

impl TxnView {
    /// Reader identity for same-transaction visibility, when transactional.
    pub fn reader(&self) -> Option<Reader> {
        (self.xid != XID_NONE)
            .then_some(Reader { xid: self.xid, command_seq: self.command_seq })
    }

    /// Runs `f` with the commit log read-locked.
    pub fn with_commit_log<T>(&self, f: impl FnOnce(&CommitLog) -> T) -> CResult<T> {
        let log = self.commit_log.read()?;
        Ok(f(&log))
    }

    /// Records an applied write command for rollback. No-op for views that
    /// cannot write (latest-committed reads).
    pub fn record_undo(&self, command: WriteCommand) -> CResult<()> {
        match &self.undo {
            Some(undo) => {
                undo.lock()?.push(command);
                Ok(())
            }
            None => Err(Error::InvalidTxnState(
                "write attempted through a read-only view".into(),
            )),
        }
    }

    /// Whether this view may write (it belongs to a live transaction).
    pub fn can_write(&self) -> bool {
        self.undo.is_some()
    }
}

impl std::fmt::Debug for TxnView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnView")
            .field("xid", &self.xid)
            .field("command_seq", &self.command_seq)
            .finish()
    }
}

struct ActiveTxn {
    level: IsolationLevel,
    command_seq: u32,
    undo: Arc<Mutex<Vec<WriteCommand>>>,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Shared {
    active: HashMap<Xid, ActiveTxn>,
    snapshots: HashMap<Xid, Arc<Snapshot>>,
    non_mvcc_active: usize,
}

struct GcThread {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

/// The transaction manager.
pub struct TransactionManager {
    cfg: ManagerConfig,
    xids: XidAllocator,
    shared: RwLock<Shared>,
    commit_log: Arc<RwLock<CommitLog>>,
    sources: RwLock<HashMap<String, Arc<dyn StorageAdapter>>>,
    closed: AtomicBool,
    gc_thread: Mutex<Option<GcThread>>,
}

impl TransactionManager {
    pub fn new(cfg: ManagerConfig) -> Arc<Self> {
        Arc::new(TransactionManager {
            cfg,
            xids: XidAllocator::new(),
            shared: RwLock::new(Shared::default()),
            commit_log: Arc::new(RwLock::new(CommitLog::new())),
            sources: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            gc_thread: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.cfg
    }

    /// The next xid to be assigned. Lock-free.
    pub fn current_xid(&self) -> Xid {
        self.xids.peek_next()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        match self.shared.read() {
            Ok(shared) => shared.active.len() + shared.non_mvcc_active,
            Err(_) => 0,
        }
    }

    pub fn active_xids(&self) -> Vec<Xid> {
        match self.shared.read() {
            Ok(shared) => shared.active.keys().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The cached snapshot of a live MVCC transaction.
    pub fn snapshot_of(&self, txn: &Transaction) -> Option<Arc<Snapshot>> {
        self.shared.read().ok()?.snapshots.get(&txn.xid).cloned()
    }

    /// Wall-clock age of a live transaction.
    pub fn transaction_age(&self, txn: &Transaction) -> Option<chrono::Duration> {
        let shared = self.shared.read().ok()?;
        shared.active.get(&txn.xid).map(|active| Utc::now() - active.started_at)
    }

    // -- source registry -----------------------------------------------------

    /// Registers a data source. Sources are registered once at engine start
    /// and looked up by name afterwards; registration seals bulk load.
    pub fn register_source(&self, adapter: Arc<dyn StorageAdapter>) -> CResult<()> {
        let name = adapter.name().to_owned();
        let mut sources = self.sources.write()?;
        if sources.contains_key(&name) {
            return Err(Error::Schema(format!("data source '{}' already registered", name)));
        }
        adapter.on_register();
        sources.insert(name, adapter);
        Ok(())
    }

    pub fn source(&self, name: &str) -> CResult<Arc<dyn StorageAdapter>> {
        self.sources
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Schema(format!("unknown data source '{}'", name)))
    }

    pub fn source_names(&self) -> Vec<String> {
        match self.sources.read() {
            Ok(sources) => {
                let mut names: Vec<String> = sources.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// Capabilities of the named sources, for begin-time downgrade decisions.
    pub fn participants(&self, names: &[String]) -> CResult<Vec<(String, Capability)>> {
        let sources = self.sources.read()?;
        names
            .iter()
            .map(|name| {
                sources
                    .get(name)
                    .map(|adapter| (name.clone(), adapter.capability()))
                    .ok_or_else(|| Error::Schema(format!("unknown data source '{}'", name)))
            })
            .collect()
    }

    // -- lifecycle -----------------------------------------------------------

    /// Begins a transaction over sources with the given capabilities.
    ///
    /// All sources at `ReadSnapshot` or above: a full MVCC transaction with a
    /// fresh snapshot. Any source below: a non-MVCC transaction when
    /// `auto_downgrade` permits, `DowngradeRefused` otherwise.
    pub fn begin(
        &self,
        level: IsolationLevel,
        participants: &[(String, Capability)],
    ) -> CResult<Transaction> {
        if self.is_closed() {
            return Err(Error::ManagerClosed);
        }
        let mode = decide_begin(participants, self.cfg.auto_downgrade)?;
        let level = level.effective();

        let mut shared = self.shared.write()?;
        if self.is_closed() {
            return Err(Error::ManagerClosed);
        }
        if shared.active.len() + shared.non_mvcc_active >= self.cfg.max_active_txns {
            return Err(Error::TooManyTransactions(self.cfg.max_active_txns));
        }

        match mode {
            TxnMode::Downgraded => {
                if self.cfg.enable_warning {
                    log::warn!(
                        "transaction downgraded to non-MVCC execution; reads observe latest committed"
                    );
                }
                shared.non_mvcc_active += 1;
                Ok(Transaction { xid: XID_NONE, level, mvcc: false })
            }
            TxnMode::Mvcc => {
                let xid = self.xids.allocate();
                let remaining = self.xids.remaining_before_wrap();
                if remaining < self.cfg.xid_wrap_threshold {
                    log::warn!(
                        "xid space low: {} ids left before wrap-around",
                        remaining
                    );
                }
                let xip: HashSet<Xid> = shared.active.keys().copied().collect();
                let xmin = ring_min(xip.iter().copied().chain([xid])).unwrap_or(xid);
                let snapshot = Arc::new(Snapshot::new(xmin, xid, xip, level));
                shared.active.insert(
                    xid,
                    ActiveTxn {
                        level,
                        command_seq: 1,
                        undo: Arc::new(Mutex::new(Vec::new())),
                        started_at: Utc::now(),
                    },
                );
                shared.snapshots.insert(xid, snapshot);
                log::debug!("begin xid={} level={}", xid, level);
                Ok(Transaction { xid, level, mvcc: true })
            }
        }
    }

    /// Starts the next statement in a transaction, advancing its command
    /// sequence. Returns the new sequence number.
    pub fn begin_statement(&self, txn: &Transaction) -> CResult<u32> {
        if !txn.mvcc {
            return Ok(0);
        }
        let mut shared = self.shared.write()?;
        let active = shared
            .active
            .get_mut(&txn.xid)
            .ok_or_else(|| Error::InvalidTxnState(format!("xid {} is not active", txn.xid)))?;
        active.command_seq += 1;
        Ok(active.command_seq)
    }

    /// The view a transaction reads and writes through. Under READ COMMITTED
    /// the snapshot is re-issued per statement; under REPEATABLE READ and
    /// SERIALIZABLE it is the one fixed at begin. Returns `None` for
    /// downgraded transactions, which bypass MVCC.
    pub fn view(&self, txn: &Transaction) -> CResult<Option<TxnView>> {
        if !txn.mvcc {
            return Ok(None);
        }
        let shared = self.shared.read()?;
        let active = shared
            .active
            .get(&txn.xid)
            .ok_or_else(|| Error::InvalidTxnState(format!("xid {} is not active", txn.xid)))?;
        let snapshot = if active.level.snapshot_per_statement() {
            Arc::new(self.snapshot_now_locked(&shared, active.level))
        } else {
            shared
                .snapshots
                .get(&txn.xid)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("snapshot missing for xid {}", txn.xid)))?
        };
        Ok(Some(TxnView {
            xid: txn.xid,
            command_seq: active.command_seq,
            snapshot,
            commit_log: self.commit_log.clone(),
            undo: Some(active.undo.clone()),
        }))
    }

    /// A read-only view of the latest committed state, outside any
    /// transaction.
    pub fn latest_view(&self) -> CResult<TxnView> {
        let shared = self.shared.read()?;
        let snapshot = Arc::new(self.snapshot_now_locked(&shared, IsolationLevel::ReadCommitted));
        Ok(TxnView {
            xid: XID_NONE,
            command_seq: 0,
            snapshot,
            commit_log: self.commit_log.clone(),
            undo: None,
        })
    }

    fn snapshot_now_locked(&self, shared: &Shared, level: IsolationLevel) -> Snapshot {
        let xip: HashSet<Xid> = shared.active.keys().copied().collect();
        let xmax = self.xids.peek_next();
        let xmin = ring_min(xip.iter().copied()).unwrap_or(xmax);
        Snapshot::new(xmin, xmax, xip, level)
    }

    /// Commits a transaction. For MVCC transactions the enqueued commands
    /// were applied as statements executed; commit validates their sources
    /// are still reachable, records `Committed`, and drops the transaction
    /// from the active set — making all writes atomically visible to
    /// snapshots taken from now on. On validation failure the applied
    /// commands are reverse-applied and the transaction aborts.
    pub fn commit(&self, txn: Transaction) -> CResult<()> {
        if !txn.mvcc {
            let mut shared = self.shared.write()?;
            shared.non_mvcc_active = shared.non_mvcc_active.saturating_sub(1);
            return Ok(());
        }

        let failed: Option<String>;
        {
            let mut shared = self.shared.write()?;
            let active = shared
                .active
                .get(&txn.xid)
                .ok_or_else(|| Error::InvalidTxnState(format!("xid {} is not active", txn.xid)))?;

            // Every command must target a source we can still reach; a
            // vanished source means the write set cannot be finalized.
            let commands = active.undo.lock()?;
            let sources = self.sources.read()?;
            failed = commands
                .iter()
                .find(|c| !sources.contains_key(&c.source))
                .map(|c| c.source.clone());
            drop(sources);
            drop(commands);

            if failed.is_none() {
                let mut log = self.commit_log.write()?;
                log.set(txn.xid, TxnStatus::Committed);
                drop(log);
                shared.active.remove(&txn.xid);
                shared.snapshots.remove(&txn.xid);
                log::debug!("commit xid={}", txn.xid);
                return Ok(());
            }
        }

        let source = failed.unwrap_or_default();
        log::error!(
            "commit of xid={} failed: source '{}' unreachable; rolling back",
            txn.xid,
            source
        );
        let xid = txn.xid;
        self.rollback(txn)?;
        Err(Error::InvalidTxnState(format!(
            "commit of xid {} aborted: source '{}' unreachable",
            xid, source
        )))
    }

    /// Rolls back a transaction: reverse-applies its commands newest-first,
    /// restoring stamped versions to live and dropping created ones, then
    /// records `Aborted`.
    pub fn rollback(&self, txn: Transaction) -> CResult<()> {
        if !txn.mvcc {
            let mut shared = self.shared.write()?;
            shared.non_mvcc_active = shared.non_mvcc_active.saturating_sub(1);
            return Ok(());
        }
        self.rollback_xid(txn.xid)
    }

    fn rollback_xid(&self, xid: Xid) -> CResult<()> {
        let commands: Vec<WriteCommand> = {
            let mut shared = self.shared.write()?;
            let active = shared
                .active
                .remove(&xid)
                .ok_or_else(|| Error::InvalidTxnState(format!("xid {} is not active", xid)))?;
            shared.snapshots.remove(&xid);
            // Record Aborted before releasing the lock: snapshot creation is
            // serialized on it, so no snapshot can catch the window between
            // leaving the active set and the status landing.
            let mut log = self.commit_log.write()?;
            log.set(xid, TxnStatus::Aborted);
            drop(log);
            let mut commands = active.undo.lock()?;
            commands.drain(..).collect()
        };

        // Physical undo happens after the logical abort; the versions are
        // already invisible to everyone, this just reclaims them.
        let ctx = ExecCtx::none();
        for command in commands.iter().rev() {
            match self.source(&command.source) {
                Ok(adapter) => {
                    if let Err(err) = adapter.apply_undo(&ctx, &command.table, &command.op) {
                        log::error!(
                            "undo on '{}.{}' failed during rollback of xid={}: {}",
                            command.source,
                            command.table,
                            xid,
                            err
                        );
                    }
                }
                Err(err) => {
                    log::error!(
                        "source '{}' unreachable during rollback of xid={}: {}",
                        command.source,
                        xid,
                        err
                    );
                }
            }
        }
        log::debug!("rollback xid={} ({} commands undone)", xid, commands.len());
        Ok(())
    }

    // -- garbage collection --------------------------------------------------

    /// One GC sweep: drops stale snapshots, truncates the commit log below
    /// the oldest active xid (minus a safety window), and lets sources
    /// vacuum dead versions. Never disturbs an active xid.
    pub fn gc(&self) -> CResult<GcStats> {
        let now = Utc::now();
        let age_threshold = chrono::Duration::from_std(self.cfg.gc_age_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        let (snapshots_dropped, log_truncated, horizon) = {
            let mut shared = self.shared.write()?;
            let Shared { active, snapshots, .. } = &mut *shared;
            let before = snapshots.len();
            snapshots.retain(|xid, snapshot| {
                active.contains_key(xid) || now - snapshot.created_at() < age_threshold
            });
            let snapshots_dropped = before - snapshots.len();

            let horizon =
                ring_min(active.keys().copied()).unwrap_or_else(|| self.xids.peek_next());
            let cutoff = horizon.wrapping_sub(COMMIT_LOG_SAFETY_WINDOW);
            let mut log = self.commit_log.write()?;
            let log_truncated = log.gc(cutoff);
            (snapshots_dropped, log_truncated, horizon)
        };

        // Vacuum outside the manager lock; adapters take their own locks.
        let ctx = ExecCtx::none();
        let mut versions_reclaimed = 0;
        let adapters: Vec<Arc<dyn StorageAdapter>> =
            self.sources.read()?.values().cloned().collect();
        for adapter in adapters {
            match adapter.vacuum(&ctx, horizon) {
                Ok(reclaimed) => versions_reclaimed += reclaimed,
                Err(err) => log::warn!("vacuum on '{}' failed: {}", adapter.name(), err),
            }
        }

        let stats = GcStats { snapshots_dropped, log_truncated, versions_reclaimed };
        log::debug!(
            "gc: {} snapshots dropped, {} log entries truncated, {} versions reclaimed",
            stats.snapshots_dropped,
            stats.log_truncated,
            stats.versions_reclaimed
        );
        Ok(stats)
    }

    /// Spawns the background GC thread, sweeping every `gc_interval`.
    pub fn spawn_gc(self: &Arc<Self>) -> CResult<()> {
        let mut slot = self.gc_thread.lock()?;
        if slot.is_some() {
            return Ok(());
        }
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_signal = stop.clone();
        let weak = Arc::downgrade(self);
        let interval = self.cfg.gc_interval;
        let handle = std::thread::Builder::new()
            .name("sqlexec-gc".into())
            .spawn(move || loop {
                let (lock, cvar) = &*stop_signal;
                let stopped = match lock.lock() {
                    Ok(guard) => match cvar.wait_timeout(guard, interval) {
                        Ok((guard, _)) => *guard,
                        Err(_) => break,
                    },
                    Err(_) => break,
                };
                if stopped {
                    break;
                }
                match weak.upgrade() {
                    Some(manager) => {
                        if let Err(err) = manager.gc() {
                            log::error!("background gc failed: {}", err);
                        }
                    }
                    None => break,
                }
            })
            .map_err(|e| Error::Internal(format!("failed to spawn gc thread: {}", e)))?;
        *slot = Some(GcThread { stop, handle });
        Ok(())
    }

    /// Closes the manager: stops GC, rolls back every live transaction, and
    /// refuses new ones. Idempotent.
    pub fn close(&self) -> CResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut slot) = self.gc_thread.lock() {
            if let Some(gc) = slot.take() {
                let (lock, cvar) = &*gc.stop;
                if let Ok(mut stopped) = lock.lock() {
                    *stopped = true;
                    cvar.notify_all();
                }
                let _ = gc.handle.join();
            }
        }
        for xid in self.active_xids() {
            if let Err(err) = self.rollback_xid(xid) {
                log::error!("rollback of xid={} during close failed: {}", xid, err);
            }
        }
        Ok(())
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// What one GC sweep reclaimed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub snapshots_dropped: usize,
    pub log_truncated: usize,
    pub versions_reclaimed: u64,
}
