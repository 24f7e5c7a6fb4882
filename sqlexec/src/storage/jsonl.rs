//! JSONL-backed adapter: one JSON object per line, wrapped MVCC store.
//!
//! Same shape as the CSV adapter: stream-parse on `connect`, serve reads and
//! writes from the wrapped in-memory store, write back on `close` through a
//! temp file and rename. Cell values are typed JSON, so inference only has
//! to vote on per-column value types.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CResult, Error};
use crate::storage::adapter::StorageAdapter;
use crate::storage::memory::MemoryAdapter;
use crate::storage::sidecar::{SidecarMeta, TypeTally, INFERENCE_SAMPLE_ROWS};
use crate::storage::{
    Capability, DeleteOptions, ExecCtx, InsertOptions, QueryOptions, SourceConfig, SourceStatus,
    SourceType, UpdateOptions,
};
use crate::txn::manager::UndoOp;
use crate::txn::xid::Xid;
use crate::types::{Column, Filter, Row, Table};

pub struct JsonlAdapter {
    cfg: SourceConfig,
    path: PathBuf,
    table_name: String,
    inner: MemoryAdapter,
    connected: AtomicBool,
}

impl JsonlAdapter {
    pub fn new(cfg: SourceConfig) -> CResult<Self> {
        let path = PathBuf::from(cfg.option_str("path").ok_or_else(|| {
            Error::Schema(format!("jsonl source '{}' has no path", cfg.name))
        })?);
        let table_name = cfg
            .option_str("table")
            .map(str::to_owned)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .ok_or_else(|| {
                Error::Schema(format!("jsonl source '{}' has no table name", cfg.name))
            })?;
        let inner_cfg = SourceConfig::new(cfg.name.clone(), SourceType::Memory);
        Ok(JsonlAdapter {
            cfg,
            path,
            table_name,
            inner: MemoryAdapter::new(inner_cfg),
            connected: AtomicBool::new(false),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn ensure_writable(&self) -> CResult<()> {
        if !self.cfg.writable {
            return Err(Error::ReadOnly(self.cfg.name.clone()));
        }
        Ok(())
    }

    fn load(&self, ctx: &ExecCtx) -> CResult<()> {
        let sidecar = SidecarMeta::load(&self.path)?;

        let mut rows: Vec<Row> = Vec::new();
        if self.path.exists() {
            let reader = BufReader::new(File::open(&self.path)?);
            for (line_no, line) in reader.lines().enumerate() {
                ctx.check()?;
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row: Row = serde_json::from_str(&line).map_err(|e| {
                    Error::Serialization(format!(
                        "{}:{}: {}",
                        self.path.display(),
                        line_no + 1,
                        e
                    ))
                })?;
                rows.push(row);
            }
        } else if sidecar.is_none() {
            return Err(Error::Io(format!(
                "jsonl file {} does not exist and no sidecar describes it",
                self.path.display()
            )));
        }

        let schema = match &sidecar {
            Some(meta) => {
                let mut schema = meta.schema.clone();
                schema.name = self.table_name.clone();
                schema
            }
            None => self.infer_schema(&rows),
        };
        schema.validate()?;

        self.inner.connect(ctx)?;
        self.inner.create_table(ctx, schema.clone())?;
        if let Some(meta) = &sidecar {
            for index in &meta.indexes {
                let mut index = index.clone();
                index.table = self.table_name.clone();
                self.inner.declare_index(index)?;
            }
        }

        // Restrict each row to plain schema columns; stray keys from lines
        // past the inference sample would otherwise fail normalization.
        let plain: Vec<String> = schema
            .columns
            .iter()
            .filter(|c| c.generated.is_none())
            .map(|c| c.name.clone())
            .collect();
        let rows: Vec<Row> = rows.into_iter().map(|row| row.project(&plain)).collect();
        let loaded = self.inner.bulk_load(ctx, &self.table_name, rows)?;
        log::info!(
            "jsonl source '{}': loaded {} rows from {}",
            self.cfg.name,
            loaded,
            self.path.display()
        );
        Ok(())
    }

    /// Column union in first-seen order; types voted over the sample prefix.
    fn infer_schema(&self, rows: &[Row]) -> Table {
        let mut order: Vec<String> = Vec::new();
        for row in rows {
            for column in row.columns() {
                if !order.iter().any(|c| c == column) {
                    order.push(column.to_owned());
                }
            }
        }
        let mut columns = Vec::with_capacity(order.len());
        for name in order {
            let mut tally = TypeTally::default();
            for row in rows.iter().take(INFERENCE_SAMPLE_ROWS) {
                if let Some(value) = row.get(&name) {
                    tally.observe_value(value);
                }
            }
            columns.push(Column::new(name, tally.decide()));
        }
        Table::new(self.table_name.clone(), columns)
    }

    fn flush(&self, ctx: &ExecCtx) -> CResult<()> {
        let schema = self.inner.table_info(ctx, &self.table_name)?;
        let rows = self.inner.live_rows(ctx, &self.table_name)?;

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for row in &rows {
                ctx.check()?;
                serde_json::to_writer(&mut writer, row)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        let indexes = self.inner.indexes_of(&self.table_name)?;
        SidecarMeta { schema, indexes }.save(&self.path)?;
        log::info!(
            "jsonl source '{}': flushed {} rows to {}",
            self.cfg.name,
            rows.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl std::fmt::Display for JsonlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "jsonl:{}", self.path.display())
    }
}

impl StorageAdapter for JsonlAdapter {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn capability(&self) -> Capability {
        Capability::Full
    }

    fn bulk_load_supported(&self) -> bool {
        self.inner.bulk_load_supported()
    }

    fn on_register(&self) {
        self.inner.on_register();
    }

    fn connect(&self, ctx: &ExecCtx) -> CResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.load(ctx)?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, ctx: &ExecCtx) -> CResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if self.cfg.writable {
            self.flush(ctx)?;
        }
        self.inner.close(ctx)
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

    fn tables(&self, ctx: &ExecCtx) -> CResult<Vec<String>> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        self.inner.tables(ctx)
    }

    fn table_info(&self, ctx: &ExecCtx, table: &str) -> CResult<Table> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        self.inner.table_info(ctx, table)
    }

    fn create_table(&self, _ctx: &ExecCtx, _info: Table) -> CResult<()> {
        Err(Error::Schema(format!(
            "jsonl source '{}' has no table namespace",
            self.cfg.name
        )))
    }

    fn drop_table(&self, _ctx: &ExecCtx, _table: &str) -> CResult<()> {
        Err(Error::Schema(format!(
            "jsonl source '{}' has no table namespace",
            self.cfg.name
        )))
    }

    fn truncate_table(&self, ctx: &ExecCtx, table: &str) -> CResult<()> {
        self.ensure_writable()?;
        self.inner.truncate_table(ctx, table)
    }

    fn query(&self, ctx: &ExecCtx, table: &str, options: &QueryOptions) -> CResult<Vec<Row>> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        self.inner.query(ctx, table, options)
    }

    fn insert(
        &self,
        ctx: &ExecCtx,
        table: &str,
        rows: Vec<Row>,
        options: &InsertOptions,
    ) -> CResult<u64> {
        self.ensure_writable()?;
        self.inner.insert(ctx, table, rows, options)
    }

    fn update(
        &self,
        ctx: &ExecCtx,
        table: &str,
        filters: &[Filter],
        patch: Row,
        options: &UpdateOptions,
    ) -> CResult<u64> {
        self.ensure_writable()?;
        self.inner.update(ctx, table, filters, patch, options)
    }

    fn delete(
        &self,
        ctx: &ExecCtx,
        table: &str,
        filters: &[Filter],
        options: &DeleteOptions,
    ) -> CResult<u64> {
        self.ensure_writable()?;
        self.inner.delete(ctx, table, filters, options)
    }

    fn apply_undo(&self, ctx: &ExecCtx, table: &str, undo: &UndoOp) -> CResult<()> {
        self.inner.apply_undo(ctx, table, undo)
    }

    fn bulk_load(&self, ctx: &ExecCtx, table: &str, rows: Vec<Row>) -> CResult<u64> {
        self.ensure_writable()?;
        self.inner.bulk_load(ctx, table, rows)
    }

    fn vacuum(&self, ctx: &ExecCtx, horizon: Xid) -> CResult<u64> {
        self.inner.vacuum(ctx, horizon)
    }

    fn status(&self, ctx: &ExecCtx) -> CResult<SourceStatus> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.cfg.name.clone()));
        }
        let mut status = self.inner.status(ctx)?;
        status.name = self.cfg.name.clone();
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Value};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn jsonl_config(path: &std::path::Path) -> SourceConfig {
        SourceConfig::new("people_jsonl", SourceType::Jsonl)
            .with_option("path", json!(path.to_string_lossy()))
    }

    fn write_people_jsonl(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("people.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"id\":1,\"name\":\"Alice\"}\n",
                "{\"id\":2,\"name\":\"Bob\"}\n",
                "{\"id\":3,\"name\":\"Carol\"}\n",
            ),
        )
        .unwrap();
        path
    }

    fn people_jsonl_adapter() -> JsonlAdapter {
        let dir = tempfile::tempdir().unwrap().into_path();
        let path = write_people_jsonl(&dir);
        let adapter = JsonlAdapter::new(jsonl_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        adapter
    }

    super::super::tests::test_adapter!(people_jsonl_adapter());

    #[test]
    fn infers_value_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"n\":1,\"f\":1.5,\"b\":true,\"s\":\"x\"}\n",
                "{\"n\":2,\"f\":2.5,\"b\":false,\"s\":\"y\",\"late\":9}\n",
            ),
        )
        .unwrap();
        let adapter = JsonlAdapter::new(jsonl_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let schema = adapter.table_info(&ExecCtx::none(), "mixed").unwrap();
        assert_eq!(schema.column("n").unwrap().datatype, DataType::Integer);
        assert_eq!(schema.column("f").unwrap().datatype, DataType::Float);
        assert_eq!(schema.column("b").unwrap().datatype, DataType::Boolean);
        assert_eq!(schema.column("s").unwrap().datatype, DataType::String);
        // Columns appearing only in later lines still join the schema.
        assert!(schema.column("late").is_some());
    }

    #[test]
    fn missing_column_reads_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":2,\"b\":\"x\"}\n").unwrap();
        let adapter = JsonlAdapter::new(jsonl_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let rows = adapter
            .query(&ExecCtx::none(), "sparse", &QueryOptions::default())
            .unwrap();
        assert_eq!(rows[0].get("b"), Some(&Value::Null));
        assert_eq!(rows[1].get("b"), Some(&Value::String("x".into())));
    }

    #[test]
    fn round_trip_preserves_rows_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_people_jsonl(dir.path());

        let adapter = JsonlAdapter::new(jsonl_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let before = adapter
            .query(&ExecCtx::none(), "people", &QueryOptions::default())
            .unwrap();
        let schema_before = adapter.table_info(&ExecCtx::none(), "people").unwrap();
        adapter.close(&ExecCtx::none()).unwrap();

        let adapter = JsonlAdapter::new(jsonl_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let after = adapter
            .query(&ExecCtx::none(), "people", &QueryOptions::default())
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(
            adapter.table_info(&ExecCtx::none(), "people").unwrap(),
            schema_before
        );
    }

    #[test]
    fn bad_line_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"a\":1}\nnot json\n").unwrap();
        let adapter = JsonlAdapter::new(jsonl_config(&path)).unwrap();
        assert!(matches!(
            adapter.connect(&ExecCtx::none()),
            Err(Error::Serialization(_))
        ));
    }
}
