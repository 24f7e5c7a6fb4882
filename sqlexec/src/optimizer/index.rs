//! Index descriptors and the per-table catalog.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::CResult;

/// Physical index shapes a source may expose.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum IndexType {
    Btree,
    Hash,
    Bitmap,
    Fulltext,
}

/// One index over a table: ordered columns plus cost-relevant metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
    /// Approximate number of distinct entries; 0 when unknown.
    #[serde(default)]
    pub cardinality: u64,
    pub index_type: IndexType,
}

impl IndexDescriptor {
    pub fn btree(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        IndexDescriptor {
            name: name.into(),
            table: table.into(),
            columns,
            unique: false,
            primary: false,
            cardinality: 0,
            index_type: IndexType::Btree,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self
    }

    pub fn with_cardinality(mut self, cardinality: u64) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// The leading (first) column.
    pub fn leading_column(&self) -> Option<&str> {
        self.columns.first().map(|c| c.as_str())
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Covering test: does this index hold every required column?
    pub fn covers(&self, required: &[String]) -> bool {
        !required.is_empty() && required.iter().all(|c| self.contains_column(c))
    }
}

/// Per-table ordered list of index descriptors.
#[derive(Debug, Default)]
pub struct IndexCatalog {
    by_table: RwLock<HashMap<String, Vec<IndexDescriptor>>>,
}

impl IndexCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index, replacing any previous descriptor with the same
    /// name on the same table.
    pub fn register(&self, index: IndexDescriptor) -> CResult<()> {
        let mut by_table = self.by_table.write()?;
        let list = by_table.entry(index.table.clone()).or_default();
        list.retain(|existing| existing.name != index.name);
        list.push(index);
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }

    pub fn indexes_of(&self, table: &str) -> Vec<IndexDescriptor> {
        match self.by_table.read() {
            Ok(by_table) => by_table.get(table).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub fn drop_table(&self, table: &str) -> CResult<()> {
        self.by_table.write()?.remove(table);
        Ok(())
    }
}
