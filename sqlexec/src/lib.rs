//! `sqlexec` is a SQL execution engine core: MVCC transactions over
//! pluggable storage adapters, with a cost-based index selector deciding the
//! access path for every scan. Protocol and SQL frontends sit outside this
//! crate and talk to it through the transaction manager and the storage
//! adapter contract.
//!
//! ## Getting started
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use sqlexec::error::CResult;
//! use sqlexec::storage::adapter::StorageAdapter;
//! use sqlexec::storage::memory::MemoryAdapter;
//! use sqlexec::storage::{ExecCtx, InsertOptions, QueryOptions, SourceConfig, SourceType};
//! use sqlexec::txn::{IsolationLevel, ManagerConfig, TransactionManager};
//! use sqlexec::types::{Column, DataType, Row, Table, Value};
//!
//! fn main() -> CResult<()> {
//!     let ctx = ExecCtx::none();
//!
//!     // One in-memory source with a single table.
//!     let adapter = Arc::new(MemoryAdapter::new(SourceConfig::new("mem", SourceType::Memory)));
//!     adapter.connect(&ctx)?;
//!     adapter.create_table(
//!         &ctx,
//!         Table::new(
//!             "users",
//!             vec![
//!                 Column::new("id", DataType::Integer).primary(),
//!                 Column::new("name", DataType::String),
//!             ],
//!         ),
//!     )?;
//!
//!     let manager = TransactionManager::new(ManagerConfig::default());
//!     manager.register_source(adapter.clone())?;
//!
//!     // Write under a transaction, then read it back from a fresh one.
//!     let participants = manager.participants(&["mem".to_string()])?;
//!     let txn = manager.begin(IsolationLevel::RepeatableRead, &participants)?;
//!     let view = manager.view(&txn)?.expect("mvcc transaction");
//!     adapter.insert(
//!         &ctx,
//!         "users",
//!         vec![Row::from_pairs([
//!             ("id", Value::Integer(1)),
//!             ("name", Value::String("Alice".into())),
//!         ])],
//!         &InsertOptions { txn: Some(view), ..Default::default() },
//!     )?;
//!     manager.commit(txn)?;
//!
//!     let reader = manager.begin(IsolationLevel::RepeatableRead, &participants)?;
//!     let view = manager.view(&reader)?.expect("mvcc transaction");
//!     let rows = adapter.query(
//!         &ctx,
//!         "users",
//!         &QueryOptions { txn: Some(view), ..Default::default() },
//!     )?;
//!     assert_eq!(rows.len(), 1);
//!     manager.commit(reader)?;
//!
//!     manager.close()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod optimizer;
pub mod storage;
pub mod txn;
pub mod types;
