//! CSV-backed adapter: load-on-open, flush-on-close, MVCC in between.
//!
//! The file is stream-parsed into a wrapped in-memory store on `connect`;
//! all reads and writes run against that store. On `close` a writable
//! adapter writes the latest committed rows back through a temp-file +
//! rename dance and refreshes the sidecar metadata. One file, one table.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CResult, Error};
use crate::storage::adapter::StorageAdapter;
use crate::storage::memory::MemoryAdapter;
use crate::storage::sidecar::{
    parse_text, render_text, SidecarMeta, TypeTally, INFERENCE_SAMPLE_ROWS,
};
use crate::storage::{
    Capability, DeleteOptions, ExecCtx, InsertOptions, QueryOptions, SourceConfig, SourceStatus,
    SourceType, UpdateOptions,
};
use crate::txn::manager::UndoOp;
use crate::txn::xid::Xid;
use crate::types::{Column, Filter, Row, Table};

pub struct CsvAdapter {
    cfg: SourceConfig,
    path: PathBuf,
    table_name: String,
    has_header: bool,
    delimiter: u8,
    inner: MemoryAdapter,
    connected: AtomicBool,
}

impl CsvAdapter {
    pub fn new(cfg: SourceConfig) -> CResult<Self> {
        let path = PathBuf::from(
            cfg.option_str("path")
                .ok_or_else(|| Error::Schema(format!("csv source '{}' has no path", cfg.name)))?,
        );
        let table_name = cfg
            .option_str("table")
            .map(str::to_owned)
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .ok_or_else(|| Error::Schema(format!("csv source '{}' has no table name", cfg.name)))?;
        let has_header = cfg.option_bool("header", true);
        let delimiter = cfg
            .option_str("delimiter")
            .and_then(|d| d.bytes().next())
            .unwrap_or(b',');

        // The wrapped store is always writable; the outer read-only flag is
        // enforced at this adapter's boundary.
        let inner_cfg = SourceConfig::new(cfg.name.clone(), SourceType::Memory);
        Ok(CsvAdapter {
            cfg,
            path,
            table_name,
            has_header,
            delimiter,
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

        let mut records: Vec<Vec<String>> = Vec::new();
        let mut headers: Vec<String> = Vec::new();
        if self.path.exists() {
            let mut reader = ::csv::ReaderBuilder::new()
                .has_headers(self.has_header)
                .delimiter(self.delimiter)
                .flexible(true)
                .from_path(&self.path)?;
            if self.has_header {
                headers = reader.headers()?.iter().map(str::to_owned).collect();
            }
            for record in reader.records() {
                ctx.check()?;
                let record = record?;
                records.push(record.iter().map(str::to_owned).collect());
            }
            if !self.has_header {
                let width = records.first().map(Vec::len).unwrap_or(0);
                headers = (1..=width).map(|i| format!("col_{}", i)).collect();
            }
        } else if sidecar.is_none() {
            return Err(Error::Io(format!(
                "csv file {} does not exist and no sidecar describes it",
                self.path.display()
            )));
        }

        let schema = match &sidecar {
            Some(meta) => {
                let mut schema = meta.schema.clone();
                schema.name = self.table_name.clone();
                schema
            }
            None => self.infer_schema(&headers, &records),
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

        // Typed columns in file order; cells beyond the header are dropped.
        let plain: Vec<&Column> =
            schema.columns.iter().filter(|c| c.generated.is_none()).collect();
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let mut row = Row::with_capacity(plain.len());
            for (idx, header) in headers.iter().enumerate() {
                let Some(column) = plain.iter().find(|c| c.name == *header) else {
                    continue;
                };
                let raw = record.get(idx).map(String::as_str).unwrap_or("");
                row.set(column.name.clone(), parse_text(raw, column.datatype));
            }
            rows.push(row);
        }
        let loaded = self.inner.bulk_load(ctx, &self.table_name, rows)?;
        log::info!(
            "csv source '{}': loaded {} rows from {}",
            self.cfg.name,
            loaded,
            self.path.display()
        );
        Ok(())
    }

    fn infer_schema(&self, headers: &[String], records: &[Vec<String>]) -> Table {
        let mut tallies: Vec<TypeTally> = vec![TypeTally::default(); headers.len()];
        for record in records.iter().take(INFERENCE_SAMPLE_ROWS) {
            for (idx, tally) in tallies.iter_mut().enumerate() {
                if let Some(raw) = record.get(idx) {
                    tally.observe_text(raw);
                }
            }
        }
        let columns = headers
            .iter()
            .zip(tallies.iter())
            .map(|(name, tally)| Column::new(name.clone(), tally.decide()))
            .collect();
        Table::new(self.table_name.clone(), columns)
    }

    /// Writes the latest committed rows back to the file, then refreshes the
    /// sidecar. Generated columns are recomputed on reload, so only plain
    /// columns are persisted.
    fn flush(&self, ctx: &ExecCtx) -> CResult<()> {
        let schema = self.inner.table_info(ctx, &self.table_name)?;
        let rows = self.inner.live_rows(ctx, &self.table_name)?;
        let plain: Vec<&Column> =
            schema.columns.iter().filter(|c| c.generated.is_none()).collect();

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = ::csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .from_path(&tmp)?;
            if self.has_header {
                writer.write_record(plain.iter().map(|c| c.name.as_str()))?;
            }
            for row in &rows {
                ctx.check()?;
                let record: Vec<String> = plain
                    .iter()
                    .map(|c| render_text(row.get(&c.name).unwrap_or(&crate::types::Value::Null)))
                    .collect();
                writer.write_record(&record)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        let indexes = self.inner.indexes_of(&self.table_name)?;
        SidecarMeta { schema, indexes }.save(&self.path)?;
        log::info!(
            "csv source '{}': flushed {} rows to {}",
            self.cfg.name,
            rows.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl std::fmt::Display for CsvAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "csv:{}", self.path.display())
    }
}

impl StorageAdapter for CsvAdapter {
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
            "csv source '{}' has no table namespace",
            self.cfg.name
        )))
    }

    fn drop_table(&self, _ctx: &ExecCtx, _table: &str) -> CResult<()> {
        Err(Error::Schema(format!(
            "csv source '{}' has no table namespace",
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

    fn csv_config(path: &std::path::Path) -> SourceConfig {
        SourceConfig::new("people_csv", SourceType::Csv)
            .with_option("path", json!(path.to_string_lossy()))
    }

    fn write_people_csv(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("people.csv");
        std::fs::write(&path, "id,name\n1,Alice\n2,Bob\n3,Carol\n").unwrap();
        path
    }

    fn people_csv_adapter() -> CsvAdapter {
        let dir = tempfile::tempdir().unwrap().into_path();
        let path = write_people_csv(&dir);
        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        adapter
    }

    super::super::tests::test_adapter!(people_csv_adapter());

    #[test]
    fn infers_types_from_samples() {
        let adapter = people_csv_adapter();
        let schema = adapter.table_info(&ExecCtx::none(), "people").unwrap();
        assert_eq!(schema.column("id").unwrap().datatype, DataType::Integer);
        assert_eq!(schema.column("name").unwrap().datatype, DataType::String);
    }

    #[test]
    fn read_only_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_people_csv(dir.path());
        let adapter = CsvAdapter::new(csv_config(&path).read_only()).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();

        let row = Row::from_pairs([("id", Value::Integer(9))]);
        let result =
            adapter.insert(&ExecCtx::none(), "people", vec![row], &Default::default());
        assert!(matches!(result, Err(Error::ReadOnly(_))));

        // Close on a read-only source must not touch the file.
        let before = std::fs::read_to_string(&path).unwrap();
        adapter.close(&ExecCtx::none()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn ddl_is_refused() {
        let adapter = people_csv_adapter();
        assert!(adapter
            .create_table(&ExecCtx::none(), Table::new("x", vec![]))
            .is_err());
        assert!(adapter.drop_table(&ExecCtx::none(), "people").is_err());
    }

    #[test]
    fn round_trip_without_writes_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_people_csv(dir.path());

        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let before = adapter
            .query(&ExecCtx::none(), "people", &QueryOptions::default())
            .unwrap();
        adapter.close(&ExecCtx::none()).unwrap();

        // Reload: same row set, schema restored from the sidecar.
        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let after = adapter
            .query(&ExecCtx::none(), "people", &QueryOptions::default())
            .unwrap();
        assert_eq!(before, after);
        assert!(SidecarMeta::load(&path).unwrap().is_some());
    }

    #[test]
    fn writes_survive_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_people_csv(dir.path());

        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        adapter
            .insert(
                &ExecCtx::none(),
                "people",
                vec![Row::from_pairs([
                    ("id", Value::Integer(4)),
                    ("name", Value::String("Dave".into())),
                ])],
                &Default::default(),
            )
            .unwrap();
        adapter.close(&ExecCtx::none()).unwrap();

        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let rows = adapter
            .query(&ExecCtx::none(), "people", &QueryOptions::default())
            .unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].get("name"), Some(&Value::String("Dave".into())));
    }

    #[test]
    fn sidecar_overrides_inference() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_people_csv(dir.path());

        // Declare id as a string column and add an index.
        let meta = SidecarMeta {
            schema: Table::new(
                "people",
                vec![
                    Column::new("id", DataType::String),
                    Column::new("name", DataType::String),
                ],
            ),
            indexes: vec![crate::optimizer::IndexDescriptor::btree(
                "idx_name",
                "people",
                vec!["name".into()],
            )],
        };
        meta.save(&path).unwrap();

        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        adapter.connect(&ExecCtx::none()).unwrap();
        let schema = adapter.table_info(&ExecCtx::none(), "people").unwrap();
        assert_eq!(schema.column("id").unwrap().datatype, DataType::String);

        let indexes = adapter.inner.indexes_of("people").unwrap();
        assert!(indexes.iter().any(|i| i.name == "idx_name"));

        let rows = adapter
            .query(&ExecCtx::none(), "people", &QueryOptions::default())
            .unwrap();
        assert_eq!(rows[0].get("id"), Some(&Value::String("1".into())));
    }

    #[test]
    fn missing_file_without_sidecar_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.csv");
        let adapter = CsvAdapter::new(csv_config(&path)).unwrap();
        assert!(matches!(adapter.connect(&ExecCtx::none()), Err(Error::Io(_))));
    }
}
