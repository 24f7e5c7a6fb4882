//! The engine façade: adapters + transaction manager behind one handle.
//!
//! Each session owns a [`SessionState`] (its open transaction, if any); the
//! engine itself is shared. Statement execution funnels every read and write
//! through the downgrade handler and the transaction manager, so capability
//! and isolation semantics match no matter which frontend submitted the
//! statement.

use std::sync::Arc;

use chrono::{DateTime, Local};

use sqlexec::error::{CResult, Error};
use sqlexec::storage::adapter::StorageAdapter;
use sqlexec::storage::csv::CsvAdapter;
use sqlexec::storage::downgrade::{decide_read, decide_write, ReadMode};
use sqlexec::storage::jsonl::JsonlAdapter;
use sqlexec::storage::memory::MemoryAdapter;
use sqlexec::storage::{
    DeleteOptions, ExecCtx, InsertOptions, QueryOptions, SourceConfig, SourceType, UpdateOptions,
};
use sqlexec::txn::{ManagerConfig, Transaction, TransactionManager, TxnView};
use sqlexec::types::{Row, Value};

use crate::statement::Statement;

/// What a statement produced.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Affected(u64),
    Message(String),
}

/// Per-session state: at most one open transaction.
#[derive(Default)]
pub struct SessionState {
    txn: Option<Transaction>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}

pub struct Engine {
    manager: Arc<TransactionManager>,
}

impl Engine {
    /// Builds adapters from the datasource configs, connects them, registers
    /// them with a fresh manager, and starts the GC loop.
    pub fn open(configs: Vec<SourceConfig>) -> CResult<Engine> {
        let manager = TransactionManager::new(ManagerConfig::default());
        let ctx = ExecCtx::none();
        for cfg in configs {
            let name = cfg.name.clone();
            let adapter: Arc<dyn StorageAdapter> = match cfg.source_type {
                SourceType::Memory => Arc::new(MemoryAdapter::new(cfg)),
                SourceType::Csv => Arc::new(CsvAdapter::new(cfg)?),
                SourceType::Jsonl => Arc::new(JsonlAdapter::new(cfg)?),
            };
            adapter.connect(&ctx)?;
            manager.register_source(adapter)?;
            log::info!("data source '{}' connected", name);
        }
        manager.spawn_gc()?;
        Ok(Engine { manager })
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Flushes and closes every source, then the manager. Idempotent.
    pub fn close(&self) -> CResult<()> {
        let ctx = ExecCtx::none();
        for name in self.manager.source_names() {
            if let Ok(adapter) = self.manager.source(&name) {
                if let Err(err) = adapter.close(&ctx) {
                    log::error!("close of source '{}' failed: {}", name, err);
                }
            }
        }
        self.manager.close()
    }

    /// The source holding `table`.
    fn source_for_table(&self, ctx: &ExecCtx, table: &str) -> CResult<Arc<dyn StorageAdapter>> {
        for name in self.manager.source_names() {
            let adapter = self.manager.source(&name)?;
            if adapter.tables(ctx)?.iter().any(|t| t == table) {
                return Ok(adapter);
            }
        }
        Err(Error::NoTable(table.to_owned()))
    }

    /// The view a read should run under: the session transaction's when one
    /// is open, a latest-committed view otherwise, or none at all when the
    /// source forces a non-MVCC read.
    fn read_view(
        &self,
        session: &SessionState,
        source: &Arc<dyn StorageAdapter>,
    ) -> CResult<Option<TxnView>> {
        let participants =
            vec![(source.name().to_owned(), source.capability())];
        if decide_read(&participants, self.manager.config().enable_warning)
            == ReadMode::LatestCommitted
        {
            return Ok(None);
        }
        match &session.txn {
            Some(txn) => {
                self.manager.begin_statement(txn)?;
                self.manager.view(txn)
            }
            None => Ok(Some(self.manager.latest_view()?)),
        }
    }

    /// Executes one statement for one session.
    pub fn execute(
        &self,
        ctx: &ExecCtx,
        session: &mut SessionState,
        statement: Statement,
    ) -> CResult<Outcome> {
        match statement {
            Statement::Begin(level) => {
                if session.in_transaction() {
                    return Err(Error::InvalidTxnState(
                        "a transaction is already open".into(),
                    ));
                }
                let names = self.manager.source_names();
                let participants = self.manager.participants(&names)?;
                let txn = self.manager.begin(level, &participants)?;
                let message = format!(
                    "transaction {} started ({})",
                    txn.xid(),
                    txn.level()
                );
                session.txn = Some(txn);
                Ok(Outcome::Message(message))
            }
            Statement::Commit => match session.txn.take() {
                Some(txn) => {
                    self.manager.commit(txn)?;
                    Ok(Outcome::Message("committed".into()))
                }
                None => Err(Error::InvalidTxnState("no open transaction".into())),
            },
            Statement::Rollback => match session.txn.take() {
                Some(txn) => {
                    self.manager.rollback(txn)?;
                    Ok(Outcome::Message("rolled back".into()))
                }
                None => Err(Error::InvalidTxnState("no open transaction".into())),
            },
            Statement::Tables => {
                let mut rows = Vec::new();
                for name in self.manager.source_names() {
                    let adapter = self.manager.source(&name)?;
                    for table in adapter.tables(ctx)? {
                        rows.push(Row::from_pairs([
                            ("table", Value::String(table)),
                            ("source", Value::String(name.clone())),
                        ]));
                    }
                }
                Ok(Outcome::Rows { columns: vec!["table".into(), "source".into()], rows })
            }
            Statement::Sources => {
                let rows = self
                    .manager
                    .source_names()
                    .into_iter()
                    .map(|name| {
                        let adapter = self.manager.source(&name)?;
                        Ok(Row::from_pairs([
                            ("source", Value::String(name)),
                            ("capability", Value::String(adapter.capability().to_string())),
                            ("writable", Value::Boolean(adapter.is_writable())),
                            ("connected", Value::Boolean(adapter.is_connected())),
                        ]))
                    })
                    .collect::<CResult<Vec<Row>>>()?;
                Ok(Outcome::Rows {
                    columns: vec![
                        "source".into(),
                        "capability".into(),
                        "writable".into(),
                        "connected".into(),
                    ],
                    rows,
                })
            }
            Statement::Schema(table) => {
                let source = self.source_for_table(ctx, &table)?;
                let info = source.table_info(ctx, &table)?;
                let rows = info
                    .columns
                    .iter()
                    .map(|c| {
                        Row::from_pairs([
                            ("column", Value::String(c.name.clone())),
                            ("type", Value::String(c.datatype.to_string())),
                            ("nullable", Value::Boolean(c.nullable)),
                            ("primary", Value::Boolean(c.primary)),
                            ("unique", Value::Boolean(c.unique)),
                            (
                                "generated",
                                match &c.generated {
                                    Some(g) => Value::String(format!(
                                        "{} AS ({})",
                                        g.kind,
                                        g.source()
                                    )),
                                    None => Value::Null,
                                },
                            ),
                        ])
                    })
                    .collect();
                Ok(Outcome::Rows {
                    columns: vec![
                        "column".into(),
                        "type".into(),
                        "nullable".into(),
                        "primary".into(),
                        "unique".into(),
                        "generated".into(),
                    ],
                    rows,
                })
            }
            Statement::Scan { table, filters, order_by, limit, offset } => {
                let source = self.source_for_table(ctx, &table)?;
                let view = self.read_view(session, &source)?;
                let options = QueryOptions {
                    filters,
                    order_by,
                    limit,
                    offset,
                    txn: view,
                    ..Default::default()
                };
                let rows = source.query(ctx, &table, &options)?;
                let columns = source.table_info(ctx, &table)?.column_names();
                Ok(Outcome::Rows { columns, rows })
            }
            Statement::Insert { table, row } => {
                self.write(ctx, session, &table, |source, view| {
                    source.insert(
                        ctx,
                        &table,
                        vec![row.clone()],
                        &InsertOptions { txn: view, ..Default::default() },
                    )
                })
            }
            Statement::Update { table, patch, filters } => {
                self.write(ctx, session, &table, |source, view| {
                    source.update(
                        ctx,
                        &table,
                        &filters,
                        patch.clone(),
                        &UpdateOptions { txn: view, ..Default::default() },
                    )
                })
            }
            Statement::Delete { table, filters } => {
                self.write(ctx, session, &table, |source, view| {
                    source.delete(
                        ctx,
                        &table,
                        &filters,
                        &DeleteOptions { txn: view, ..Default::default() },
                    )
                })
            }
            Statement::Info => {
                let mut rows = Vec::new();
                for name in self.manager.source_names() {
                    let adapter = self.manager.source(&name)?;
                    let status = adapter.status(ctx)?;
                    rows.push(Row::from_pairs([
                        ("source", Value::String(status.name)),
                        ("tables", Value::Integer(status.tables as i64)),
                        ("live_rows", Value::Integer(status.live_rows as i64)),
                        ("versions", Value::Integer(status.versions as i64)),
                    ]));
                }
                rows.push(Row::from_pairs([
                    ("source", Value::String("(manager)".into())),
                    (
                        "tables",
                        Value::Integer(self.manager.active_count() as i64),
                    ),
                    ("live_rows", Value::Integer(0)),
                    (
                        "versions",
                        Value::Integer(self.manager.current_xid() as i64),
                    ),
                ]));
                Ok(Outcome::Rows {
                    columns: vec![
                        "source".into(),
                        "tables".into(),
                        "live_rows".into(),
                        "versions".into(),
                    ],
                    rows,
                })
            }
            Statement::Time => {
                let now: DateTime<Local> = Local::now();
                Ok(Outcome::Message(now.format("%Y-%m-%d %H:%M:%S%.3f").to_string()))
            }
            Statement::Vacuum => {
                let stats = self.manager.gc()?;
                Ok(Outcome::Message(format!(
                    "gc: {} snapshots dropped, {} log entries truncated, {} versions reclaimed",
                    stats.snapshots_dropped, stats.log_truncated, stats.versions_reclaimed
                )))
            }
            Statement::Exit => Ok(Outcome::Message("bye".into())),
        }
    }

    /// Shared write path: capability check, transaction handling (explicit
    /// or auto-commit), constraint failures aborting the open transaction.
    fn write<F>(
        &self,
        ctx: &ExecCtx,
        session: &mut SessionState,
        table: &str,
        apply: F,
    ) -> CResult<Outcome>
    where
        F: Fn(&Arc<dyn StorageAdapter>, Option<TxnView>) -> CResult<u64>,
    {
        let source = self.source_for_table(ctx, table)?;
        let participants = vec![(source.name().to_owned(), source.capability())];
        decide_write(&participants)?;

        if session.in_transaction() {
            let view = {
                let txn = session.txn.as_ref().expect("checked in_transaction");
                self.manager.begin_statement(txn)?;
                self.manager.view(txn)?
            };
            match apply(&source, view) {
                Ok(affected) => Ok(Outcome::Affected(affected)),
                Err(err) => {
                    // Constraint and conflict errors abort the transaction
                    // but leave the session alive.
                    if err.aborts_transaction() {
                        if let Some(txn) = session.txn.take() {
                            let xid = txn.xid();
                            if let Err(rb) = self.manager.rollback(txn) {
                                log::error!("rollback of xid={} failed: {}", xid, rb);
                            }
                        }
                    }
                    Err(err)
                }
            }
        } else {
            // Auto-commit: one statement, one transaction.
            let txn = self.manager.begin(
                sqlexec::txn::IsolationLevel::RepeatableRead,
                &participants,
            )?;
            self.manager.begin_statement(&txn)?;
            let view = self.manager.view(&txn)?;
            match apply(&source, view) {
                Ok(affected) => {
                    self.manager.commit(txn)?;
                    Ok(Outcome::Affected(affected))
                }
                Err(err) => {
                    let xid = txn.xid();
                    if let Err(rb) = self.manager.rollback(txn) {
                        log::error!("rollback of xid={} failed: {}", xid, rb);
                    }
                    Err(err)
                }
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::parse;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn memory_engine() -> Engine {
        Engine::open(vec![SourceConfig::new("mem", SourceType::Memory)]).unwrap()
    }

    fn csv_engine(dir: &std::path::Path) -> Engine {
        let path = dir.join("people.csv");
        std::fs::write(&path, "id,name\n1,Alice\n2,Bob\n").unwrap();
        let cfg = SourceConfig::new("people", SourceType::Csv)
            .with_option("path", json!(path.to_string_lossy()));
        Engine::open(vec![cfg]).unwrap()
    }

    fn run(engine: &Engine, session: &mut SessionState, input: &str) -> CResult<Outcome> {
        engine.execute(&ExecCtx::none(), session, parse(input)?)
    }

    #[test]
    fn scan_over_csv_source() {
        let dir = tempfile::tempdir().unwrap();
        let engine = csv_engine(dir.path());
        let mut session = SessionState::new();

        let outcome = run(&engine, &mut session, "SCAN people WHERE id = 2").unwrap();
        let Outcome::Rows { rows, .. } = outcome else { panic!("expected rows") };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&Value::String("Bob".into())));
    }

    #[test]
    fn transaction_isolation_between_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let engine = csv_engine(dir.path());
        let mut writer = SessionState::new();
        let mut reader = SessionState::new();

        // Reader opens a transaction before the writer commits.
        run(&engine, &mut reader, "BEGIN").unwrap();
        run(&engine, &mut reader, "SCAN people").unwrap();

        run(&engine, &mut writer, "INSERT people id = 3, name = 'Carol'").unwrap();

        // Repeatable read: still two rows inside the reader's transaction.
        let Outcome::Rows { rows, .. } =
            run(&engine, &mut reader, "SCAN people").unwrap()
        else {
            panic!("expected rows")
        };
        assert_eq!(rows.len(), 2);
        run(&engine, &mut reader, "COMMIT").unwrap();

        // A fresh scan sees the committed insert.
        let Outcome::Rows { rows, .. } =
            run(&engine, &mut reader, "SCAN people").unwrap()
        else {
            panic!("expected rows")
        };
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn rollback_discards_writes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = csv_engine(dir.path());
        let mut session = SessionState::new();

        run(&engine, &mut session, "BEGIN").unwrap();
        run(&engine, &mut session, "DELETE people WHERE id = 1").unwrap();
        run(&engine, &mut session, "ROLLBACK").unwrap();

        let Outcome::Rows { rows, .. } = run(&engine, &mut session, "SCAN people").unwrap()
        else {
            panic!("expected rows")
        };
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn commit_without_transaction_errors() {
        let engine = memory_engine();
        let mut session = SessionState::new();
        assert!(matches!(
            run(&engine, &mut session, "COMMIT"),
            Err(Error::InvalidTxnState(_))
        ));
        assert!(matches!(
            run(&engine, &mut session, "SCAN ghost"),
            Err(Error::NoTable(_))
        ));
    }

    #[test]
    fn sources_and_info_report() {
        let engine = memory_engine();
        let mut session = SessionState::new();

        let Outcome::Rows { rows, .. } = run(&engine, &mut session, "SOURCES").unwrap()
        else {
            panic!("expected rows")
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("source"), Some(&Value::String("mem".into())));
        assert_eq!(rows[0].get("capability"), Some(&Value::String("Full".into())));

        assert!(run(&engine, &mut session, "INFO").is_ok());
        assert!(run(&engine, &mut session, "VACUUM").is_ok());
    }
}
