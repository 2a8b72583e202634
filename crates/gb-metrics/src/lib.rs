//! Regression metrics and the cross-repetition aggregator.
//!
//! Provides:
//! - MSE, RMSE, explained variance, R² and Pearson r for one prediction set
//! - Mean / population-sd aggregation over repetitions
//! - The tab-separated summary row appended to the results log

pub mod regression;
pub mod summary;

pub use regression::RegressionMetrics;
pub use summary::{aggregate, AggregateResult, GroupSummary, MetricSummary, RunMetadata, SummaryRow};
