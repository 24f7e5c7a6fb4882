//! Table schemas: ordered columns, constraints, generated columns.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_derive::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use strum_macros::{Display, EnumString};

use crate::error::{CResult, Error};
use crate::types::expr::Expr;
use crate::types::row::Row;
use crate::types::value::{DataType, Value};

/// How a generated column is produced.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, DeriveSerialize, DeriveDeserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum GeneratedKind {
    /// Materialized into the payload on write.
    Stored,
    /// Computed from dependencies at read time.
    Virtual,
}

/// A generated column: kind plus the parsed expression. Serializes as the
/// expression source text so sidecar metadata stays readable.
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratedColumn {
    pub kind: GeneratedKind,
    source: String,
    expression: Expr,
}

impl GeneratedColumn {
    pub fn parse(kind: GeneratedKind, source: &str) -> CResult<Self> {
        let expression = Expr::parse(source)?;
        Ok(GeneratedColumn { kind, source: source.to_owned(), expression })
    }

    pub fn expression(&self) -> &Expr {
        &self.expression
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.expression.dependencies()
    }
}

#[derive(DeriveSerialize, DeriveDeserialize)]
struct GeneratedColumnRepr {
    kind: GeneratedKind,
    expr: String,
}

impl Serialize for GeneratedColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GeneratedColumnRepr { kind: self.kind, expr: self.source.clone() }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GeneratedColumn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = GeneratedColumnRepr::deserialize(deserializer)?;
        GeneratedColumn::parse(repr.kind, &repr.expr).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// A single column definition.
#[derive(Clone, Debug, PartialEq, DeriveSerialize, DeriveDeserialize)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub generated: Option<GeneratedColumn>,
}

fn default_true() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Column {
            name: name.into(),
            datatype,
            nullable: true,
            primary: false,
            unique: false,
            auto_increment: false,
            default: None,
            generated: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn generated(mut self, kind: GeneratedKind, source: &str) -> CResult<Self> {
        self.generated = Some(GeneratedColumn::parse(kind, source)?);
        Ok(self)
    }
}

/// A table: name plus ordered column list.
#[derive(Clone, Debug, PartialEq, DeriveSerialize, DeriveDeserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Table { name: name.into(), columns }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// The primary-key column, if declared.
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary)
    }

    /// Checks the schema is internally consistent: at most one primary key,
    /// auto-increment only on integer primaries, generated dependencies
    /// resolve to earlier non-virtual columns.
    pub fn validate(&self) -> CResult<()> {
        if self.columns.is_empty() {
            return Err(Error::Schema(format!("table '{}' has no columns", self.name)));
        }
        let primaries = self.columns.iter().filter(|c| c.primary).count();
        if primaries > 1 {
            return Err(Error::Schema(format!(
                "table '{}' declares {} primary keys",
                self.name, primaries
            )));
        }
        for (idx, column) in self.columns.iter().enumerate() {
            if column.auto_increment && column.datatype != DataType::Integer {
                return Err(Error::Schema(format!(
                    "auto-increment column '{}.{}' must be INTEGER",
                    self.name, column.name
                )));
            }
            if let Some(generated) = &column.generated {
                for dep in generated.dependencies() {
                    let dep_idx = self
                        .columns
                        .iter()
                        .position(|c| c.name == dep)
                        .ok_or_else(|| Error::NoColumn(dep.clone()))?;
                    let dep_column = &self.columns[dep_idx];
                    if generated.kind == GeneratedKind::Stored {
                        // Stored columns are computed in declaration order, so
                        // a stored column can only read columns before it; it
                        // must never read a virtual one.
                        if dep_idx >= idx {
                            return Err(Error::Schema(format!(
                                "stored column '{}' depends on later column '{}'",
                                column.name, dep
                            )));
                        }
                        if dep_column
                            .generated
                            .as_ref()
                            .map(|g| g.kind == GeneratedKind::Virtual)
                            .unwrap_or(false)
                        {
                            return Err(Error::Schema(format!(
                                "stored column '{}' depends on virtual column '{}'",
                                column.name, dep
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Validates an incoming row against the schema and returns it
    /// normalized: unknown columns rejected, defaults filled in, type fit
    /// checked. Nullability of auto-increment, generated and defaulted
    /// columns is settled later in the write path, so it is not checked here.
    pub fn normalize_row(&self, row: &Row) -> CResult<Row> {
        for column in row.columns() {
            if self.column(column).is_none() {
                return Err(Error::NoColumn(column.to_owned()));
            }
        }
        let mut out = Row::with_capacity(self.columns.len());
        for column in &self.columns {
            if column.generated.is_some() {
                // Writers may not supply generated columns.
                if row.contains(&column.name) {
                    return Err(Error::Schema(format!(
                        "column '{}' is generated and cannot be assigned",
                        column.name
                    )));
                }
                continue;
            }
            let value = match row.get(&column.name) {
                Some(v) => v.clone(),
                None => column.default.clone().unwrap_or(Value::Null),
            };
            if !value.is_null() && !value.fits(column.datatype) {
                return Err(Error::Schema(format!(
                    "value {} does not fit column '{}.{}' ({})",
                    value, self.name, column.name, column.datatype
                )));
            }
            out.set(column.name.clone(), value);
        }
        Ok(out)
    }

    /// Recomputes Stored generated columns into the payload, in declaration
    /// order so chained stored columns see their inputs.
    pub fn materialize_stored(&self, row: &mut Row) -> CResult<()> {
        for column in &self.columns {
            if let Some(generated) = &column.generated {
                if generated.kind == GeneratedKind::Stored {
                    let value = generated.expression().eval(row)?;
                    row.set(column.name.clone(), value);
                }
            }
        }
        Ok(())
    }

    /// Computes Virtual generated columns for an outgoing row.
    pub fn materialize_virtual(&self, row: &mut Row) -> CResult<()> {
        for column in &self.columns {
            if let Some(generated) = &column.generated {
                if generated.kind == GeneratedKind::Virtual {
                    let value = generated.expression().eval(row)?;
                    row.set(column.name.clone(), value);
                }
            }
        }
        Ok(())
    }

    /// Checks NOT NULL constraints on a fully materialized payload.
    pub fn check_not_null(&self, row: &Row) -> CResult<()> {
        for column in &self.columns {
            if !column.nullable {
                let missing =
                    row.get(&column.name).map(|v| v.is_null()).unwrap_or(true);
                if missing {
                    return Err(Error::NullViolation(self.name.clone(), column.name.clone()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn orders() -> Table {
        Table::new(
            "orders",
            vec![
                Column::new("id", DataType::Integer).primary().auto_increment(),
                Column::new("price", DataType::Float),
                Column::new("qty", DataType::Integer),
                Column::new("total", DataType::Float)
                    .generated(GeneratedKind::Stored, "price * qty")
                    .unwrap(),
                Column::new("gross", DataType::Float)
                    .generated(GeneratedKind::Virtual, "total * 1.1")
                    .unwrap(),
            ],
        )
    }

    #[test]
    fn validate_accepts_orders() {
        orders().validate().unwrap();
    }

    #[test]
    fn stored_cannot_depend_on_virtual() {
        let table = Table::new(
            "t",
            vec![
                Column::new("a", DataType::Integer),
                Column::new("v", DataType::Integer)
                    .generated(GeneratedKind::Virtual, "a + 1")
                    .unwrap(),
                Column::new("s", DataType::Integer)
                    .generated(GeneratedKind::Stored, "v + 1")
                    .unwrap(),
            ],
        );
        assert!(matches!(table.validate(), Err(Error::Schema(_))));
    }

    #[test]
    fn generated_columns_materialize() {
        let table = orders();
        let input = Row::from_pairs([
            ("id", Value::Integer(1)),
            ("price", Value::Integer(10)),
            ("qty", Value::Integer(2)),
        ]);
        let mut row = table.normalize_row(&input).unwrap();
        table.materialize_stored(&mut row).unwrap();
        assert_eq!(row.get("total"), Some(&Value::Integer(20)));

        table.materialize_virtual(&mut row).unwrap();
        let Some(Value::Float(gross)) = row.get("gross") else {
            panic!("gross not computed")
        };
        assert!((gross - 22.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_rejects_assigning_generated() {
        let table = orders();
        let input = Row::from_pairs([("price", Value::Integer(1)), ("total", Value::Integer(9))]);
        assert!(matches!(table.normalize_row(&input), Err(Error::Schema(_))));
    }

    #[test]
    fn normalize_rejects_unknown_columns() {
        let table = orders();
        let input = Row::from_pairs([("nope", Value::Integer(1))]);
        assert!(matches!(table.normalize_row(&input), Err(Error::NoColumn(_))));
    }

    #[test]
    fn defaults_fill_missing() {
        let table = Table::new(
            "t",
            vec![
                Column::new("id", DataType::Integer).primary(),
                Column::new("state", DataType::String).with_default(Value::String("new".into())),
            ],
        );
        let row = table
            .normalize_row(&Row::from_pairs([("id", Value::Integer(1))]))
            .unwrap();
        assert_eq!(row.get("state"), Some(&Value::String("new".into())));
    }

    #[test]
    fn meta_json_round_trip() {
        let table = orders();
        let json = serde_json::to_string(&table).unwrap();
        let back: Table = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
