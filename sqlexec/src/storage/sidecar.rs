//! Sidecar metadata and type inference for file-backed sources.
//!
//! A data file `<name>` may carry a sidecar `<name>.meta` holding the schema
//! and index definitions as JSON. When present it overrides type inference
//! on reload and restores declared indexes. When absent, the adapter infers
//! a schema by sampling rows.

use std::fs;
use std::path::{Path, PathBuf};

use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use crate::optimizer::IndexDescriptor;
use crate::types::{DataType, Table, Value};

/// How many rows type inference samples.
pub const INFERENCE_SAMPLE_ROWS: usize = 100;

/// Sidecar contents: the schema, plus any indexes declared on the table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SidecarMeta {
    pub schema: Table,
    #[serde(default)]
    pub indexes: Vec<IndexDescriptor>,
}

impl SidecarMeta {
    /// `<file>.meta` next to the data file.
    pub fn path_for(data_path: &Path) -> PathBuf {
        let mut name = data_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".meta");
        data_path.with_file_name(name)
    }

    /// Loads the sidecar if one exists.
    pub fn load(data_path: &Path) -> CResult<Option<SidecarMeta>> {
        let path = Self::path_for(data_path);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let meta: SidecarMeta = serde_json::from_str(&raw)
            .map_err(|e| Error::Schema(format!("bad sidecar {}: {}", path.display(), e)))?;
        meta.schema.validate()?;
        Ok(Some(meta))
    }

    /// Writes the sidecar through a temp file and rename, so a crash cannot
    /// leave a torn file.
    pub fn save(&self, data_path: &Path) -> CResult<()> {
        let path = Self::path_for(data_path);
        let tmp = path.with_extension("meta.tmp");
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Tallies observed cell types for one column; the most frequent wins, with
/// the narrower type preferred on ties and string as the overall default.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeTally {
    ints: usize,
    floats: usize,
    bools: usize,
    strings: usize,
}

impl TypeTally {
    /// Classifies a raw text cell (CSV). Empty cells are typeless.
    pub fn observe_text(&mut self, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        if raw.parse::<i64>().is_ok() {
            self.ints += 1;
        } else if raw.parse::<f64>().is_ok() {
            self.floats += 1;
        } else if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
            self.bools += 1;
        } else {
            self.strings += 1;
        }
    }

    /// Classifies a typed value (JSONL).
    pub fn observe_value(&mut self, value: &Value) {
        match value {
            Value::Null => {}
            Value::Integer(_) => self.ints += 1,
            Value::Float(_) => self.floats += 1,
            Value::Boolean(_) => self.bools += 1,
            Value::String(_) => self.strings += 1,
        }
    }

    pub fn decide(&self) -> DataType {
        if self.strings > 0 {
            // Any non-coercible cell forces string.
            return DataType::String;
        }
        // Integers that sit among floats widen to float.
        let candidates = [
            (self.floats, DataType::Float),
            (self.ints, DataType::Integer),
            (self.bools, DataType::Boolean),
        ];
        let best = candidates.iter().max_by_key(|(count, _)| *count);
        match best {
            Some((count, datatype)) if *count > 0 => {
                if *datatype == DataType::Integer && self.floats > 0 {
                    DataType::Float
                } else {
                    *datatype
                }
            }
            _ => DataType::String,
        }
    }
}

/// Parses a raw CSV cell into a typed value. Empty cells are NULL;
/// unparseable cells degrade to NULL rather than poisoning the load.
pub fn parse_text(raw: &str, datatype: DataType) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Null;
    }
    match datatype {
        DataType::Integer => raw.parse::<i64>().map(Value::Integer).unwrap_or(Value::Null),
        DataType::Float => raw.parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        DataType::Boolean => {
            if raw.eq_ignore_ascii_case("true") {
                Value::Boolean(true)
            } else if raw.eq_ignore_ascii_case("false") {
                Value::Boolean(false)
            } else {
                Value::Null
            }
        }
        DataType::String => Value::String(raw.to_owned()),
    }
}

/// Renders a value back into a CSV cell. NULL round-trips as the empty cell.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
