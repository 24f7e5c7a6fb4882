//! Dynamic values flowing through rows, filters, and expressions.
//!
//! Values serialize untagged, so a JSONL row round-trips to the JSON scalars a
//! MySQL driver would expect (`1`, `1.5`, `true`, `"a"`, `null`).

use std::cmp::Ordering;

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Column data types. File-backed adapters infer these from sampled rows.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum DataType {
    #[strum(to_string = "BOOLEAN", serialize = "BOOL")]
    Boolean,
    #[strum(to_string = "INTEGER", serialize = "INT", serialize = "BIGINT")]
    Integer,
    #[strum(to_string = "FLOAT", serialize = "DOUBLE", serialize = "DECIMAL")]
    Float,
    #[strum(to_string = "STRING", serialize = "TEXT", serialize = "VARCHAR")]
    String,
}

/// A single dynamic value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// The data type of this value, or None for SQL NULL.
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Float(_) => Some(DataType::Float),
            Value::String(_) => Some(DataType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view for arithmetic and histogram bucketing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Checks whether this value can be stored in a column of `dt`,
    /// widening integers to floats but nothing else.
    pub fn fits(&self, dt: DataType) -> bool {
        match (self, dt) {
            (Value::Null, _) => true,
            (Value::Boolean(_), DataType::Boolean) => true,
            (Value::Integer(_), DataType::Integer) => true,
            (Value::Integer(_), DataType::Float) => true,
            (Value::Float(_), DataType::Float) => true,
            (Value::String(_), DataType::String) => true,
            _ => false,
        }
    }

    /// Total ordering used by ORDER BY and range filters. NULL sorts first,
    /// numbers compare across Integer/Float, distinct types order by type.
    pub fn cmp_order(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => type_rank(a).cmp(&type_rank(b)),
            },
        }
    }

    /// Equality for filters and unique checks. NULL never equals anything,
    /// including NULL.
    pub fn sql_eq(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        self.cmp_order(other) == Ordering::Equal
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
    }
}

/// Structural equality, used by tests and payload comparison. Unlike
/// [`Value::sql_eq`], NULL == NULL here.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (Integer(a), Float(b)) | (Float(b), Integer(a)) => {
                (*a as f64).total_cmp(b) == Ordering::Equal
            }
            (String(a), String(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_json_round_trip() {
        for (v, json) in [
            (Value::Null, "null"),
            (Value::Boolean(true), "true"),
            (Value::Integer(42), "42"),
            (Value::Float(1.5), "1.5"),
            (Value::String("abc".into()), "\"abc\""),
        ] {
            assert_eq!(serde_json::to_string(&v).unwrap(), json);
            let back: Value = serde_json::from_str(json).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn ordering_crosses_numeric_types() {
        assert_eq!(Value::Integer(2).cmp_order(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(2.0).cmp_order(&Value::Integer(2)), Ordering::Equal);
        assert_eq!(Value::Null.cmp_order(&Value::Integer(0)), Ordering::Less);
    }

    #[test]
    fn sql_null_never_equal() {
        assert!(!Value::Null.sql_eq(&Value::Null));
        assert!(Value::Integer(1).sql_eq(&Value::Float(1.0)));
    }

    #[test]
    fn datatype_parses_sql_names() {
        assert_eq!("DECIMAL".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("varchar".parse::<DataType>().unwrap(), DataType::String);
        assert_eq!(DataType::Integer.to_string(), "INTEGER");
    }
}
