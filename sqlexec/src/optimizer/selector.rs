//! The index selector: cheapest access path for a filter set.
//!
//! Costs are abstract units: one unit per b-tree level descended, 0.01 per
//! estimated row scanned, and a flat penalty for the base-table lookup a
//! non-covering index forces.

use crate::optimizer::estimator::{filter_selectivity, DEFAULT_ROW_COUNT};
use crate::optimizer::index::IndexDescriptor;
use crate::optimizer::stats::TableStatistics;
use crate::types::Filter;

/// Cost of fetching the base row when the index does not cover the query.
/// A stand-in for one random-IO unit.
const TABLE_LOOKUP_COST: f64 = 15.0;

/// Cost multipliers for how well the filter set lines up with the index
/// prefix. A point predicate on the leading column descends straight down;
/// a range still seeks but scans wider; trailing-only matches read much of
/// the index.
const LEADING_POINT_FACTOR: f64 = 1.0;
const LEADING_RANGE_FACTOR: f64 = 1.5;
const TRAILING_ONLY_FACTOR: f64 = 4.0;

/// Fallback b-tree height when neither index cardinality nor column NDV is
/// known.
const FALLBACK_INDEX_HEIGHT: f64 = 3.0;

/// The selector's answer: which index (if any), whether it covers the
/// required columns, and the cost mathematics behind the choice.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexSelection {
    pub index: Option<IndexDescriptor>,
    pub covering: bool,
    pub est_rows: f64,
    pub est_cost: f64,
    pub reason: String,
}

impl IndexSelection {
    fn none(est_rows: f64, reason: &str) -> Self {
        IndexSelection {
            index: None,
            covering: false,
            est_rows,
            est_cost: f64::INFINITY,
            reason: reason.to_owned(),
        }
    }
}

/// Chooses the cheapest usable index for `(filters, required_columns)`.
///
/// An index is usable when at least one filter references one of its
/// columns; a filter on the leading column is preferred, a trailing-only
/// match pays a cost factor. Ties break deterministically: covering first,
/// then fewer estimated rows, then index name.
pub fn select_index(
    stats: Option<&TableStatistics>,
    indexes: &[IndexDescriptor],
    filters: &[Filter],
    required_columns: &[String],
) -> IndexSelection {
    let row_count = stats.map(|s| s.row_count as f64).unwrap_or(DEFAULT_ROW_COUNT);
    if indexes.is_empty() {
        return IndexSelection::none(row_count, "no index");
    }

    let mut best: Option<IndexSelection> = None;
    for index in indexes {
        let Some(candidate) = evaluate(stats, row_count, index, filters, required_columns)
        else {
            continue;
        };
        best = Some(match best.take() {
            None => candidate,
            Some(current) => pick(current, candidate),
        });
    }

    best.unwrap_or_else(|| IndexSelection::none(row_count, "no usable index for filter set"))
}

fn evaluate(
    stats: Option<&TableStatistics>,
    row_count: f64,
    index: &IndexDescriptor,
    filters: &[Filter],
    required_columns: &[String],
) -> Option<IndexSelection> {
    let indexed: Vec<&Filter> =
        filters.iter().filter(|f| index.contains_column(&f.column)).collect();
    if indexed.is_empty() {
        return None;
    }

    // Product of per-column selectivities, same column composing via min.
    let mut selectivity = 1.0f64;
    for column in &index.columns {
        let on_column: Vec<&&Filter> =
            indexed.iter().filter(|f| f.column == *column).collect();
        if on_column.is_empty() {
            continue;
        }
        let column_selectivity = on_column
            .iter()
            .map(|f| filter_selectivity(stats, f))
            .fold(f64::INFINITY, f64::min);
        selectivity *= column_selectivity;
    }
    let est_rows = row_count * selectivity;

    let height = index_height(stats, index);
    let leading_factor = match index.leading_column() {
        Some(leading) => {
            let leading_filters: Vec<&&Filter> =
                indexed.iter().filter(|f| f.column == leading).collect();
            if leading_filters.is_empty() {
                TRAILING_ONLY_FACTOR
            } else if leading_filters.iter().any(|f| f.is_point()) {
                LEADING_POINT_FACTOR
            } else {
                LEADING_RANGE_FACTOR
            }
        }
        None => TRAILING_ONLY_FACTOR,
    };
    let scan_cost = (height + est_rows * 0.01) * leading_factor;

    let covering = index.covers(required_columns);
    let est_cost = scan_cost + if covering { 0.0 } else { TABLE_LOOKUP_COST };

    let reason = format!(
        "index '{}' covering={} est_rows={:.1} cost={:.2}",
        index.name, covering, est_rows, est_cost
    );
    Some(IndexSelection {
        index: Some(index.clone()),
        covering,
        est_rows,
        est_cost,
        reason,
    })
}

/// `max(2, ceil(log2(cardinality)))`, falling back to the leading column's
/// NDV, then to a constant.
fn index_height(stats: Option<&TableStatistics>, index: &IndexDescriptor) -> f64 {
    let cardinality = if index.cardinality > 0 {
        index.cardinality as f64
    } else {
        let ndv = index
            .leading_column()
            .and_then(|leading| stats.and_then(|s| s.column(leading)))
            .map(|c| c.distinct_count)
            .unwrap_or(0);
        if ndv > 0 {
            ndv as f64
        } else {
            return FALLBACK_INDEX_HEIGHT;
        }
    };
    cardinality.log2().ceil().max(2.0)
}

/// Deterministic preference between two candidates.
fn pick(a: IndexSelection, b: IndexSelection) -> IndexSelection {
    if (b.est_cost - a.est_cost).abs() > f64::EPSILON {
        return if b.est_cost < a.est_cost { b } else { a };
    }
    if a.covering != b.covering {
        return if b.covering { b } else { a };
    }
    if (b.est_rows - a.est_rows).abs() > f64::EPSILON {
        return if b.est_rows < a.est_rows { b } else { a };
    }
    let name_a = a.index.as_ref().map(|i| i.name.as_str()).unwrap_or("");
    let name_b = b.index.as_ref().map(|i| i.name.as_str()).unwrap_or("");
    if name_b < name_a {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::index::IndexDescriptor;
    use crate::optimizer::stats::TableStatistics;
    use crate::types::{FilterOp, Row, Value};

    fn stats() -> TableStatistics {
        let rows: Vec<Row> = (1..=1000)
            .map(|i| {
                Row::from_pairs([
                    ("id", Value::Integer(i)),
                    ("name", Value::String(format!("u{}", i))),
                    ("age", Value::Integer(i % 60)),
                ])
            })
            .collect();
        TableStatistics::collect(&rows, 1000, 10)
    }

    fn indexes() -> Vec<IndexDescriptor> {
        vec![
            IndexDescriptor::btree("idx_id", "t", vec!["id".into()])
                .unique()
                .with_cardinality(1000),
            IndexDescriptor::btree("idx_covering", "t", vec!["id".into(), "name".into()])
                .with_cardinality(1000),
        ]
    }

    #[test]
    fn empty_catalog_returns_no_index() {
        let selection = select_index(None, &[], &[Filter::eq("id", Value::Integer(1))], &[]);
        assert!(selection.index.is_none());
        assert!(selection.est_cost.is_infinite());
        assert_eq!(selection.reason, "no index");
    }

    #[test]
    fn unrelated_filters_leave_indexes_unusable() {
        let selection = select_index(
            None,
            &indexes(),
            &[Filter::eq("age", Value::Integer(30))],
            &[],
        );
        assert!(selection.index.is_none());
        assert!(selection.est_cost.is_infinite());
    }

    #[test]
    fn covering_index_beats_point_index_at_same_selectivity() {
        let stats = stats();
        let required = vec!["id".to_string(), "name".to_string()];
        let filters = vec![Filter::eq("id", Value::Integer(7))];

        let selection = select_index(Some(&stats), &indexes(), &filters, &required);
        let chosen = selection.index.as_ref().unwrap();
        assert_eq!(chosen.name, "idx_covering");
        assert!(selection.covering);
        assert!(selection.reason.contains("idx_covering"));
        assert!(selection.reason.contains("covering=true"));

        // The non-covering index pays the table-lookup penalty.
        let only_id = select_index(
            Some(&stats),
            &indexes()[..1],
            &filters,
            &required,
        );
        assert!(!only_id.covering);
        assert!(selection.est_cost < only_id.est_cost);
    }

    #[test]
    fn empty_required_columns_never_covering() {
        let stats = stats();
        let selection = select_index(
            Some(&stats),
            &indexes(),
            &[Filter::eq("id", Value::Integer(7))],
            &[],
        );
        assert!(!selection.covering);
    }

    #[test]
    fn range_on_leading_column_still_usable() {
        let stats = stats();
        let filters = vec![Filter::new("id", FilterOp::Gt, Value::Integer(900))];
        let selection = select_index(Some(&stats), &indexes(), &filters, &[]);
        assert!(selection.index.is_some());
        assert!(selection.est_cost.is_finite());
    }

    #[test]
    fn trailing_only_match_pays_a_penalty() {
        let stats = stats();
        let covering_only = &indexes()[1..]; // (id, name)
        let on_name = select_index(
            Some(&stats),
            covering_only,
            &[Filter::eq("name", Value::String("u7".into()))],
            &[],
        );
        let on_id = select_index(
            Some(&stats),
            covering_only,
            &[Filter::eq("id", Value::Integer(7))],
            &[],
        );
        assert!(on_name.est_cost > on_id.est_cost);
    }

    #[test]
    fn selection_is_deterministic() {
        let stats = stats();
        let filters = vec![Filter::eq("id", Value::Integer(7))];
        let required = vec!["id".to_string()];
        let first = select_index(Some(&stats), &indexes(), &filters, &required);
        for _ in 0..10 {
            let again = select_index(Some(&stats), &indexes(), &filters, &required);
            assert_eq!(first, again);
        }
    }

    #[test]
    fn identical_costs_tie_break_by_name() {
        let twins = vec![
            IndexDescriptor::btree("b_idx", "t", vec!["id".into()]).with_cardinality(64),
            IndexDescriptor::btree("a_idx", "t", vec!["id".into()]).with_cardinality(64),
        ];
        let selection =
            select_index(None, &twins, &[Filter::eq("id", Value::Integer(1))], &[]);
        assert_eq!(selection.index.unwrap().name, "a_idx");
    }
}
