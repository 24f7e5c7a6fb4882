//! Cardinality estimation from statistics.
//!
//! The estimator never errors: missing statistics degrade to conservative
//! defaults (row count 100, selectivity 0.1) so planning always proceeds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::optimizer::stats::TableStatistics;
use crate::types::{Filter, FilterOp};

/// Default row count assumed for tables without statistics.
pub const DEFAULT_ROW_COUNT: f64 = 100.0;
/// Default selectivity for filters nothing is known about.
pub const DEFAULT_SELECTIVITY: f64 = 0.1;

/// Estimates the selectivity of one filter from column statistics: the
/// histogram when available, else `1 / distinct_count`, else the default.
pub fn filter_selectivity(stats: Option<&TableStatistics>, filter: &Filter) -> f64 {
    let Some(stats) = stats else {
        return DEFAULT_SELECTIVITY;
    };
    if let Some(histogram) = stats.histogram(&filter.column) {
        if let Some(selectivity) = histogram.estimate_selectivity(filter) {
            return selectivity;
        }
    }
    if let Some(column) = stats.column(&filter.column) {
        if column.distinct_count > 0 {
            let per_value = 1.0 / column.distinct_count as f64;
            // IN widens the single-value estimate by list length.
            return match filter.op {
                FilterOp::In => (per_value * filter.operands.len() as f64).min(1.0),
                _ => per_value,
            };
        }
    }
    DEFAULT_SELECTIVITY
}

/// Combined selectivity of a conjunctive filter set: filters on disjoint
/// columns multiply independently, filters on the same column compose via
/// min-selectivity (a conservative upper bound).
pub fn combined_selectivity(stats: Option<&TableStatistics>, filters: &[Filter]) -> f64 {
    let mut per_column: HashMap<&str, f64> = HashMap::new();
    for filter in filters {
        let selectivity = filter_selectivity(stats, filter);
        per_column
            .entry(filter.column.as_str())
            .and_modify(|current| *current = current.min(selectivity))
            .or_insert(selectivity);
    }
    per_column.values().product()
}

/// Read-only statistics registry plus the estimation entry points.
#[derive(Default)]
pub struct CardinalityEstimator {
    stats: RwLock<HashMap<String, Arc<TableStatistics>>>,
}

impl CardinalityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) the statistics bundle for a table.
    pub fn set_statistics(&self, table: &str, stats: TableStatistics) {
        if let Ok(mut map) = self.stats.write() {
            map.insert(table.to_owned(), Arc::new(stats));
        }
    }

    pub fn statistics(&self, table: &str) -> Option<Arc<TableStatistics>> {
        self.stats.read().ok()?.get(table).cloned()
    }

    pub fn drop_statistics(&self, table: &str) {
        if let Ok(mut map) = self.stats.write() {
            map.remove(table);
        }
    }

    /// Estimated rows produced by a full scan.
    pub fn estimate_table_scan(&self, table: &str) -> f64 {
        self.statistics(table)
            .map(|s| s.row_count as f64)
            .unwrap_or(DEFAULT_ROW_COUNT)
    }

    /// Estimated rows surviving a conjunctive filter set.
    pub fn estimate_filter(&self, table: &str, filters: &[Filter]) -> f64 {
        let stats = self.statistics(table);
        let row_count =
            stats.as_ref().map(|s| s.row_count as f64).unwrap_or(DEFAULT_ROW_COUNT);
        if filters.is_empty() {
            return row_count;
        }
        row_count * combined_selectivity(stats.as_deref(), filters)
    }
}
