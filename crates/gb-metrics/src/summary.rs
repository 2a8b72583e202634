//! Aggregation of per-repetition metrics into the run summary.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gb_types::{validation_error, GbResult};

use crate::regression::RegressionMetrics;

/// Mean and population standard deviation of one metric across repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub sd: f64,
}

impl MetricSummary {
    /// `sd` uses ddof = 0.
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            sd: var.sqrt(),
        }
    }
}

/// Summaries of the five metrics for one evaluation group (validation or test).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub mse: MetricSummary,
    pub rmse: MetricSummary,
    pub evs: MetricSummary,
    pub r2: MetricSummary,
    pub pcc: MetricSummary,
}

impl GroupSummary {
    fn from_metrics(rows: &[RegressionMetrics]) -> Self {
        let column = |f: fn(&RegressionMetrics) -> f64| -> MetricSummary {
            let values: Vec<f64> = rows.iter().map(f).collect();
            MetricSummary::from_values(&values)
        };
        Self {
            mse: column(|m| m.mse),
            rmse: column(|m| m.rmse),
            evs: column(|m| m.evs),
            r2: column(|m| m.r2),
            pcc: column(|m| m.pcc),
        }
    }

    /// Summaries in [`RegressionMetrics::NAMES`] order.
    pub fn entries(&self) -> [MetricSummary; 5] {
        [self.mse, self.rmse, self.evs, self.r2, self.pcc]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub validation: GroupSummary,
    pub test: GroupSummary,
    /// Repetitions that contributed.
    pub n_repetitions: usize,
}

/// Aggregate per-repetition `(validation, test)` metrics.
pub fn aggregate(reps: &[(RegressionMetrics, RegressionMetrics)]) -> GbResult<AggregateResult> {
    if reps.is_empty() {
        return Err(validation_error!("cannot aggregate zero repetitions"));
    }
    let validation: Vec<RegressionMetrics> = reps.iter().map(|(v, _)| *v).collect();
    let test: Vec<RegressionMetrics> = reps.iter().map(|(_, t)| *t).collect();
    Ok(AggregateResult {
        validation: GroupSummary::from_metrics(&validation),
        test: GroupSummary::from_metrics(&test),
        n_repetitions: reps.len(),
    })
}

/// Descriptive fields of a run, written in front of the metric columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub date: DateTime<Local>,
    /// Wall-clock seconds from search start to the end of training.
    pub run_time_secs: f64,
    pub tag: String,
    pub target: String,
    pub n_train: usize,
    pub n_features: usize,
    pub folds: usize,
    pub repetitions: usize,
}

impl RunMetadata {
    pub fn new(target: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            date: Local::now(),
            run_time_secs: 0.0,
            tag: tag.into(),
            target: target.into(),
            n_train: 0,
            n_features: 0,
            folds: 0,
            repetitions: 0,
        }
    }
}

/// One line of the cumulative results log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub metadata: RunMetadata,
    pub aggregate: AggregateResult,
}

impl SummaryRow {
    pub fn new(metadata: RunMetadata, aggregate: AggregateResult) -> Self {
        Self {
            metadata,
            aggregate,
        }
    }

    pub fn header() -> Vec<String> {
        let mut cols: Vec<String> = [
            "Date",
            "RunTime",
            "Tag",
            "Y",
            "NumInstances",
            "NumFeatures",
            "CV_fold",
            "CV_rep",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        for group in ["val", "test"] {
            for name in RegressionMetrics::NAMES {
                cols.push(format!("{name}_{group}"));
                cols.push(format!("{name}_{group}_sd"));
            }
        }
        cols
    }

    pub fn fields(&self) -> Vec<String> {
        let m = &self.metadata;
        let mut fields = vec![
            m.date.format("%Y-%m-%d %H:%M:%S").to_string(),
            m.run_time_secs.to_string(),
            m.tag.clone(),
            m.target.clone(),
            m.n_train.to_string(),
            m.n_features.to_string(),
            m.folds.to_string(),
            m.repetitions.to_string(),
        ];
        for group in [&self.aggregate.validation, &self.aggregate.test] {
            for s in group.entries() {
                fields.push(s.mean.to_string());
                fields.push(s.sd.to_string());
            }
        }
        fields
    }

    pub fn header_line() -> String {
        Self::header().join("\t")
    }

    pub fn to_tsv(&self) -> String {
        self.fields().join("\t")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(r2: f64) -> RegressionMetrics {
        RegressionMetrics {
            mse: 1.0 - r2,
            rmse: (1.0 - r2).sqrt(),
            evs: r2,
            r2,
            pcc: r2.sqrt(),
        }
    }

    #[test]
    fn population_sd() {
        let s = MetricSummary::from_values(&[1.0, 3.0]);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.sd, 1.0);

        let single = MetricSummary::from_values(&[0.7]);
        assert_eq!(single.sd, 0.0);
    }

    #[test]
    fn aggregate_groups() {
        let reps = vec![(metrics(0.5), metrics(0.4)), (metrics(0.7), metrics(0.6))];
        let agg = aggregate(&reps).unwrap();
        assert_eq!(agg.n_repetitions, 2);
        assert!((agg.validation.r2.mean - 0.6).abs() < 1e-12);
        assert!((agg.validation.r2.sd - 0.1).abs() < 1e-12);
        assert!((agg.test.r2.mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn aggregate_rejects_empty() {
        assert!(aggregate(&[]).is_err());
    }

    #[test]
    fn header_and_row_line_up() {
        let header = SummaryRow::header();
        assert_eq!(header.len(), 28);
        assert_eq!(header[8], "MSE_val");
        assert_eq!(header[9], "MSE_val_sd");
        assert_eq!(header[27], "PCC_test_sd");

        let agg = aggregate(&[(metrics(0.5), metrics(0.4))]).unwrap();
        let mut meta = RunMetadata::new("height", "snp");
        meta.folds = 5;
        meta.repetitions = 1;
        let row = SummaryRow::new(meta, agg);
        let fields = row.fields();
        assert_eq!(fields.len(), header.len());
        assert_eq!(fields[2], "snp");
        assert_eq!(fields[3], "height");
        assert_eq!(row.to_tsv().split('\t').count(), 28);
    }
}
