//! Storage: the uniform adapter contract and its implementations.
//!
//! Every data source, whatever its backend, satisfies the same
//! [`adapter::StorageAdapter`] contract. The in-memory MVCC store is the
//! reference implementation; the CSV and JSONL adapters wrap it, owning only
//! load-on-open and flush-on-close.

pub mod adapter;
pub mod csv;
pub mod downgrade;
pub mod jsonl;
pub mod memory;
pub mod sidecar;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{CResult, Error};
use crate::txn::manager::TxnView;
use crate::txn::snapshot::IsolationLevel;
use crate::types::Filter;

/// How far a source participates in MVCC. The lattice is total:
/// `None < ReadSnapshot < WriteVersion < Full`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Capability {
    /// Plain key-value or remote source; transacted only via downgrade.
    None,
    /// Serves reads under a caller-supplied snapshot.
    ReadSnapshot,
    /// Accepts versioned writes.
    WriteVersion,
    /// Full MVCC participation on both sides.
    Full,
}

/// Adapter kind, as named by `datasources.json`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum SourceType {
    Memory,
    Csv,
    Jsonl,
}

/// A registered data source: name, kind, writability, opaque options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default = "default_true")]
    pub writable: bool,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub database: Option<String>,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        SourceConfig {
            name: name.into(),
            source_type,
            writable: true,
            options: HashMap::new(),
            database: None,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn with_option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.options.insert(key.to_owned(), value);
        self
    }

    /// String option accessor; absent keys come back as None.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_bool(&self, key: &str, default: bool) -> bool {
        self.options.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// Cooperative cancellation token. Cancel flips the flag; operations check it
/// at loop boundaries and bail out with [`Error::Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Per-operation context: cancellation only, for now.
#[derive(Clone, Debug, Default)]
pub struct ExecCtx {
    token: Option<CancelToken>,
}

impl ExecCtx {
    /// A context that can never be cancelled.
    pub fn none() -> Self {
        ExecCtx { token: None }
    }

    pub fn with_token(token: CancelToken) -> Self {
        ExecCtx { token: Some(token) }
    }

    /// Returns `Err(Cancelled)` once the token has been flipped.
    pub fn check(&self) -> CResult<()> {
        match &self.token {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Sort key for query results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub desc: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        OrderBy { column: column.into(), desc: false }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        OrderBy { column: column.into(), desc: true }
    }
}

/// Options for `query`. The default is an unfiltered full scan.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    /// Columns to return; None means all, in schema order.
    pub projection: Option<Vec<String>>,
    pub limit: Option<u64>,
    /// Negative offsets are treated as zero.
    pub offset: i64,
    pub order_by: Vec<OrderBy>,
    pub isolation: Option<IsolationLevel>,
    /// The reading transaction's view; None reads the latest live tips.
    pub txn: Option<TxnView>,
}

impl QueryOptions {
    pub fn filtered(filters: Vec<Filter>) -> Self {
        QueryOptions { filters, ..Default::default() }
    }

    pub fn under(txn: TxnView) -> Self {
        QueryOptions { txn: Some(txn), ..Default::default() }
    }
}

/// Options for `insert`.
#[derive(Clone, Debug, Default)]
pub struct InsertOptions {
    pub txn: Option<TxnView>,
    /// Skip rows that would violate a unique constraint instead of failing.
    pub ignore_duplicates: bool,
    pub batch_size: Option<usize>,
}

/// Options for `update`.
#[derive(Clone, Debug, Default)]
pub struct UpdateOptions {
    pub txn: Option<TxnView>,
    pub batch_size: Option<usize>,
}

/// Options for `delete`.
#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    pub txn: Option<TxnView>,
    /// Delete even rows another in-flight transaction has stamped.
    pub force: bool,
}

/// Adapter status snapshot, for INFO surfaces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    /// The adapter name.
    pub name: String,
    /// Number of tables.
    pub tables: u64,
    /// Live (visible-tip) rows across all tables.
    pub live_rows: u64,
    /// Total stored versions, live and dead.
    pub versions: u64,
}
