//! Filters: single-column predicates combined conjunctively.
//!
//! The planner hands the storage layer a flat filter list; anything it cannot
//! resolve through an index is applied here as a residual predicate.

use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{CResult, Error};
use crate::types::row::Row;
use crate::types::value::Value;

/// Filter comparison operators.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum FilterOp {
    #[strum(to_string = "=", serialize = "==")]
    Eq,
    #[strum(to_string = "!=", serialize = "<>")]
    Ne,
    #[strum(to_string = "<")]
    Lt,
    #[strum(to_string = "<=")]
    Le,
    #[strum(to_string = ">")]
    Gt,
    #[strum(to_string = ">=")]
    Ge,
    #[strum(to_string = "IN", ascii_case_insensitive)]
    In,
    #[strum(to_string = "LIKE", ascii_case_insensitive)]
    Like,
}

/// A single-column predicate. `operands` holds one literal except for `IN`,
/// which carries the whole candidate list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub operands: Vec<Value>,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Filter { column: column.into(), op, operands: vec![value] }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Filter::new(column, FilterOp::Eq, value)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter { column: column.into(), op: FilterOp::In, operands: values }
    }

    /// The single literal for non-IN filters.
    pub fn value(&self) -> CResult<&Value> {
        self.operands
            .first()
            .ok_or_else(|| Error::Filter(format!("filter on '{}' has no operand", self.column)))
    }

    /// True for operators that pin the column to (at most) one value. The
    /// index selector gives these the leading-column bonus.
    pub fn is_point(&self) -> bool {
        match self.op {
            FilterOp::Eq | FilterOp::Ne | FilterOp::In => true,
            FilterOp::Like => self.like_prefix().is_some(),
            _ => false,
        }
    }

    /// For LIKE patterns anchored at the start (`abc%`), the literal prefix.
    pub fn like_prefix(&self) -> Option<String> {
        if self.op != FilterOp::Like {
            return None;
        }
        let Some(Value::String(pattern)) = self.operands.first() else {
            return None;
        };
        let prefix: String =
            pattern.chars().take_while(|c| *c != '%' && *c != '_').collect();
        if prefix.is_empty() {
            None
        } else {
            Some(prefix)
        }
    }

    /// Evaluates this filter against a row. A missing column is a filter
    /// error; a NULL value fails every predicate (SQL three-valued logic
    /// collapsed to false).
    pub fn matches(&self, row: &Row) -> CResult<bool> {
        let value = row
            .get(&self.column)
            .ok_or_else(|| Error::Filter(format!("unknown filter column '{}'", self.column)))?;
        if value.is_null() {
            return Ok(false);
        }
        Ok(match self.op {
            FilterOp::Eq => value.sql_eq(self.value()?),
            FilterOp::Ne => {
                let rhs = self.value()?;
                !rhs.is_null() && !value.sql_eq(rhs)
            }
            FilterOp::Lt => value.cmp_order(self.value()?).is_lt(),
            FilterOp::Le => value.cmp_order(self.value()?).is_le(),
            FilterOp::Gt => value.cmp_order(self.value()?).is_gt(),
            FilterOp::Ge => value.cmp_order(self.value()?).is_ge(),
            FilterOp::In => self.operands.iter().any(|candidate| value.sql_eq(candidate)),
            FilterOp::Like => match (value, self.value()?) {
                (Value::String(s), Value::String(pattern)) => like_match(pattern, s),
                _ => false,
            },
        })
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.op == FilterOp::In {
            let list: Vec<String> = self.operands.iter().map(|v| v.to_string()).collect();
            write!(f, "{} IN ({})", self.column, list.join(", "))
        } else {
            write!(f, "{} {} {}", self.column, self.op, self.operands.first().unwrap_or(&Value::Null))
        }
    }
}

/// Applies a conjunctive filter set.
pub fn matches_all(filters: &[Filter], row: &Row) -> CResult<bool> {
    for filter in filters {
        if !filter.matches(row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// SQL LIKE: `%` matches any run, `_` matches one character. Case-sensitive,
/// no escape syntax.
fn like_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[char], t: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((&'%', rest)) => (0..=t.len()).any(|skip| inner(rest, &t[skip..])),
            Some((&'_', rest)) => !t.is_empty() && inner(rest, &t[1..]),
            Some((c, rest)) => t.first() == Some(c) && inner(rest, &t[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    inner(&p, &t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row() -> Row {
        Row::from_pairs([
            ("id", Value::Integer(7)),
            ("name", Value::String("Alice".into())),
            ("score", Value::Float(8.5)),
            ("note", Value::Null),
        ])
    }

    #[test]
    fn comparison_operators() {
        let r = row();
        assert!(Filter::eq("id", Value::Integer(7)).matches(&r).unwrap());
        assert!(Filter::new("id", FilterOp::Ne, Value::Integer(8)).matches(&r).unwrap());
        assert!(Filter::new("score", FilterOp::Gt, Value::Integer(8)).matches(&r).unwrap());
        assert!(Filter::new("score", FilterOp::Le, Value::Float(8.5)).matches(&r).unwrap());
        assert!(!Filter::new("id", FilterOp::Lt, Value::Integer(7)).matches(&r).unwrap());
    }

    #[test]
    fn in_list() {
        let r = row();
        let f = Filter::is_in("id", vec![Value::Integer(1), Value::Integer(7)]);
        assert!(f.matches(&r).unwrap());
        let f = Filter::is_in("id", vec![Value::Integer(1)]);
        assert!(!f.matches(&r).unwrap());
    }

    #[test]
    fn like_patterns() {
        let r = row();
        for (pattern, expect) in [
            ("Alice", true),
            ("Al%", true),
            ("%ice", true),
            ("%li%", true),
            ("A_ice", true),
            ("Bob%", false),
            ("alice", false),
        ] {
            let f = Filter::new("name", FilterOp::Like, Value::String(pattern.into()));
            assert_eq!(f.matches(&r).unwrap(), expect, "pattern {}", pattern);
        }
    }

    #[test]
    fn like_prefix_detection() {
        let f = Filter::new("name", FilterOp::Like, Value::String("Al%".into()));
        assert_eq!(f.like_prefix(), Some("Al".into()));
        assert!(f.is_point());

        let f = Filter::new("name", FilterOp::Like, Value::String("%ice".into()));
        assert_eq!(f.like_prefix(), None);
        assert!(!f.is_point());
    }

    #[test]
    fn null_fails_everything() {
        let r = row();
        assert!(!Filter::eq("note", Value::Null).matches(&r).unwrap());
        assert!(!Filter::new("note", FilterOp::Ne, Value::Integer(1)).matches(&r).unwrap());
    }

    #[test]
    fn unknown_column_is_filter_error() {
        assert!(matches!(
            Filter::eq("ghost", Value::Integer(1)).matches(&row()),
            Err(Error::Filter(_))
        ));
    }

    #[test]
    fn conjunction() {
        let r = row();
        let filters = vec![
            Filter::eq("id", Value::Integer(7)),
            Filter::new("name", FilterOp::Like, Value::String("A%".into())),
        ];
        assert!(matches_all(&filters, &r).unwrap());
        let filters = vec![
            Filter::eq("id", Value::Integer(7)),
            Filter::eq("name", Value::String("Bob".into())),
        ];
        assert!(!matches_all(&filters, &r).unwrap());
    }
}
