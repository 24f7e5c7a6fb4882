//! The optimizer core: statistics, cardinality estimation, index selection.

pub mod estimator;
pub mod index;
pub mod selector;
pub mod stats;

pub use estimator::{CardinalityEstimator, DEFAULT_ROW_COUNT, DEFAULT_SELECTIVITY};
pub use index::{IndexCatalog, IndexDescriptor, IndexType};
pub use selector::{select_index, IndexSelection};
pub use stats::{ColumnStatistics, Histogram, TableStatistics};
