//! Table and column statistics with equi-width histograms.
//!
//! Statistics are built by a sampler outside the core and consulted
//! read-only by the estimator. Histograms are numeric-only; string columns
//! fall back to distinct counts.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::types::{Filter, FilterOp, Row, Value};

/// Per-column statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub distinct_count: u64,
    pub null_count: u64,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

/// One equi-width histogram bucket over `[lower, upper)`; the last bucket is
/// closed on both ends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
    pub distinct: u64,
}

/// An equi-width histogram over the numeric values of one column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    buckets: Vec<Bucket>,
    total: u64,
}

impl Histogram {
    /// Builds a histogram from sampled numeric values. Returns None when
    /// there is nothing to bucket.
    pub fn build(mut values: Vec<f64>, bucket_count: usize) -> Option<Histogram> {
        values.retain(|v| v.is_finite());
        if values.is_empty() || bucket_count == 0 {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let min = values[0];
        let max = values[values.len() - 1];
        let width = if max > min { (max - min) / bucket_count as f64 } else { 1.0 };

        let mut buckets: Vec<Bucket> = (0..bucket_count)
            .map(|i| Bucket {
                lower: min + width * i as f64,
                upper: min + width * (i + 1) as f64,
                count: 0,
                distinct: 0,
            })
            .collect();

        let mut previous: Option<f64> = None;
        for value in values.iter().copied() {
            let idx = (((value - min) / width) as usize).min(bucket_count - 1);
            buckets[idx].count += 1;
            if previous != Some(value) {
                buckets[idx].distinct += 1;
            }
            previous = Some(value);
        }
        Some(Histogram { buckets, total: values.len() as u64 })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Estimated selectivity of `filter` against this histogram, in [0, 1].
    /// Non-numeric literals and unsupported operators return None so the
    /// caller can fall back to distinct counts.
    pub fn estimate_selectivity(&self, filter: &Filter) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let literal = filter.operands.first()?.as_f64();
        match filter.op {
            FilterOp::Eq => {
                let value = literal?;
                let bucket = self.bucket_of(value)?;
                if bucket.count == 0 {
                    return Some(0.0);
                }
                let per_value = bucket.count as f64 / bucket.distinct.max(1) as f64;
                Some(clamp(per_value / self.total as f64))
            }
            FilterOp::Ne => {
                let eq = self
                    .estimate_selectivity(&Filter::eq(filter.column.clone(), filter.operands[0].clone()))?;
                Some(clamp(1.0 - eq))
            }
            FilterOp::Lt | FilterOp::Le => {
                let value = literal?;
                Some(clamp(self.fraction_below(value)))
            }
            FilterOp::Gt | FilterOp::Ge => {
                let value = literal?;
                Some(clamp(1.0 - self.fraction_below(value)))
            }
            FilterOp::In => {
                let mut total = 0.0;
                for operand in &filter.operands {
                    let eq = Filter::eq(filter.column.clone(), operand.clone());
                    total += self.estimate_selectivity(&eq).unwrap_or(0.0);
                }
                Some(clamp(total))
            }
            FilterOp::Like => None,
        }
    }

    fn bucket_of(&self, value: f64) -> Option<&Bucket> {
        let last = self.buckets.len().checked_sub(1)?;
        self.buckets.iter().enumerate().find_map(|(i, b)| {
            let in_bucket =
                value >= b.lower && (value < b.upper || (i == last && value <= b.upper));
            in_bucket.then_some(b)
        })
    }

    /// Fraction of values strictly below `value`, with linear interpolation
    /// inside the containing bucket.
    fn fraction_below(&self, value: f64) -> f64 {
        let mut below = 0u64;
        for bucket in &self.buckets {
            if value >= bucket.upper {
                below += bucket.count;
            } else if value > bucket.lower {
                let span = bucket.upper - bucket.lower;
                let part = if span > 0.0 { (value - bucket.lower) / span } else { 0.0 };
                return (below as f64 + bucket.count as f64 * part) / self.total as f64;
            } else {
                break;
            }
        }
        below as f64 / self.total as f64
    }
}

fn clamp(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Per-table statistics bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: u64,
    pub sample_size: u64,
    pub columns: HashMap<String, ColumnStatistics>,
    pub histograms: HashMap<String, Histogram>,
}

impl TableStatistics {
    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.columns.get(name)
    }

    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.histograms.get(name)
    }

    /// Builds statistics from a row sample. `total_rows` is the true table
    /// cardinality; the sample may be smaller.
    pub fn collect(rows: &[Row], total_rows: u64, histogram_buckets: usize) -> TableStatistics {
        let mut columns: HashMap<String, ColumnStatistics> = HashMap::new();
        let mut numeric: HashMap<String, Vec<f64>> = HashMap::new();
        let mut distinct: HashMap<String, std::collections::HashSet<String>> = HashMap::new();

        for row in rows {
            for (column, value) in row.iter() {
                let stats = columns.entry(column.to_owned()).or_default();
                if value.is_null() {
                    stats.null_count += 1;
                    continue;
                }
                distinct.entry(column.to_owned()).or_default().insert(value.to_string());
                let replace_min = stats
                    .min
                    .as_ref()
                    .map(|m| value.cmp_order(m).is_lt())
                    .unwrap_or(true);
                if replace_min {
                    stats.min = Some(value.clone());
                }
                let replace_max = stats
                    .max
                    .as_ref()
                    .map(|m| value.cmp_order(m).is_gt())
                    .unwrap_or(true);
                if replace_max {
                    stats.max = Some(value.clone());
                }
                if let Some(number) = value.as_f64() {
                    numeric.entry(column.to_owned()).or_default().push(number);
                }
            }
        }

        for (column, values) in &distinct {
            if let Some(stats) = columns.get_mut(column) {
                stats.distinct_count = values.len() as u64;
            }
        }

        let mut histograms = HashMap::new();
        for (column, values) in numeric {
            if let Some(histogram) = Histogram::build(values, histogram_buckets) {
                histograms.insert(column, histogram);
            }
        }

        TableStatistics {
            row_count: total_rows,
            sample_size: rows.len() as u64,
            columns,
            histograms,
        }
    }
}
