//! Repeated refits of the chosen configuration.
//!
//! Each repetition j reseeds the model with `random_state = j`, computes
//! out-of-fold predictions on the train subset, refits on all of it and
//! predicts the test subset. Results are handed to a [`RepetitionSink`] one
//! at a time, before the next repetition starts.

use crossbeam_channel::Sender;
use tracing::{info, warn};

use gb_data::{ArtifactStore, LabeledTable, Split};
use gb_metrics::RegressionMetrics;
use gb_model::{BoostParams, GradientBoostingRegressor};
use gb_types::{
    CancellationToken, GbError, GbResult, PipelineStage, RepetitionPolicy, RunEvent,
    TrainingError,
};

use crate::cv::{cross_val_predict, Fold, KFold};
use crate::parallel::FoldExecutor;

/// Everything produced by one repetition.
#[derive(Debug, Clone)]
pub struct RepetitionResult {
    pub repetition: usize,
    pub validation: RegressionMetrics,
    pub test: RegressionMetrics,
    /// Out-of-fold predictions, aligned to the train ids.
    pub oof_predictions: Vec<f64>,
    /// Predictions of the full-train model, aligned to the test ids.
    pub test_predictions: Vec<f64>,
    pub importances: Vec<f64>,
    pub model: GradientBoostingRegressor,
}

impl RepetitionResult {
    /// Train predictions followed by test predictions.
    pub fn prediction_series(&self) -> Vec<f64> {
        self.oof_predictions
            .iter()
            .chain(&self.test_predictions)
            .copied()
            .collect()
    }
}

/// Receives each repetition as soon as it completes.
pub trait RepetitionSink {
    fn accept(&mut self, result: &RepetitionResult) -> GbResult<()>;
}

/// Discards every result.
#[derive(Debug, Default)]
pub struct NullSink;

impl RepetitionSink for NullSink {
    fn accept(&mut self, _result: &RepetitionResult) -> GbResult<()> {
        Ok(())
    }
}

impl RepetitionSink for ArtifactStore {
    fn accept(&mut self, result: &RepetitionResult) -> GbResult<()> {
        self.save_model(result.repetition, &result.model)?;
        Ok(())
    }
}

/// What the repetition loop accumulated.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub validation_rows: Vec<(usize, RegressionMetrics)>,
    pub test_rows: Vec<(usize, RegressionMetrics)>,
    /// Features x `rep_j`.
    pub importances: LabeledTable,
    /// All ids (train then test) x `rep_j`.
    pub predictions: LabeledTable,
    /// Repetitions that failed under [`RepetitionPolicy::Isolate`].
    pub failed_repetitions: Vec<(usize, String)>,
}

impl TrainingOutcome {
    pub fn n_succeeded(&self) -> usize {
        self.validation_rows.len()
    }

    /// `(validation, test)` pairs of the successful repetitions.
    pub fn metric_pairs(&self) -> Vec<(RegressionMetrics, RegressionMetrics)> {
        self.validation_rows
            .iter()
            .zip(&self.test_rows)
            .map(|((_, v), (_, t))| (*v, *t))
            .collect()
    }
}

pub struct RepeatedTrainer<'a> {
    split: &'a Split,
    params: BoostParams,
    folds: Vec<Fold>,
    executor: FoldExecutor,
    repetitions: usize,
    policy: RepetitionPolicy,
    cancel: CancellationToken,
    events: Option<Sender<RunEvent>>,
}

impl<'a> RepeatedTrainer<'a> {
    /// The out-of-fold partition is contiguous and unshuffled, and shared by
    /// every repetition.
    pub fn new(
        split: &'a Split,
        params: BoostParams,
        n_folds: usize,
        repetitions: usize,
        n_jobs: usize,
    ) -> GbResult<Self> {
        params.validate()?;
        if repetitions == 0 {
            return Err(GbError::Config("repetitions must be positive".into()));
        }
        let folds = KFold::new(n_folds).split(split.n_train())?;
        let executor = FoldExecutor::new(n_jobs, folds.len())?;
        Ok(Self {
            split,
            params,
            folds,
            executor,
            repetitions,
            policy: RepetitionPolicy::Abort,
            cancel: CancellationToken::new(),
            events: None,
        })
    }

    pub fn with_policy(mut self, policy: RepetitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_events(mut self, tx: Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn run_repetition(&self, repetition: usize) -> GbResult<RepetitionResult> {
        let params = self.params.clone().with_random_state(repetition as u64);
        let train = &self.split.train;
        let test = &self.split.test;

        let oof_predictions = cross_val_predict(&params, train, &self.folds, &self.executor)?;
        let mut model = GradientBoostingRegressor::new(params)?;
        model.fit_subset(train)?;
        let test_predictions = model.predict(test.features())?;

        Ok(RepetitionResult {
            repetition,
            validation: RegressionMetrics::compute(train.target(), &oof_predictions)?,
            test: RegressionMetrics::compute(test.target(), &test_predictions)?,
            importances: model.feature_importances()?.to_vec(),
            oof_predictions,
            test_predictions,
            model,
        })
    }

    /// Run every repetition in order. Sink failures always abort; model
    /// failures abort or are recorded depending on the policy.
    pub fn run<S: RepetitionSink + ?Sized>(&self, sink: &mut S) -> GbResult<TrainingOutcome> {
        let train = &self.split.train;
        let all_ids: Vec<String> = train
            .ids()
            .iter()
            .chain(self.split.test.ids())
            .cloned()
            .collect();
        let mut outcome = TrainingOutcome {
            validation_rows: Vec::with_capacity(self.repetitions),
            test_rows: Vec::with_capacity(self.repetitions),
            importances: LabeledTable::new("feature", train.feature_names().to_vec()),
            predictions: LabeledTable::new("ID", all_ids),
            failed_repetitions: Vec::new(),
        };

        for j in 0..self.repetitions {
            if self.cancel.is_cancelled() {
                warn!(completed = outcome.n_succeeded(), "training cancelled");
                return Err(GbError::Cancelled {
                    stage: PipelineStage::Training,
                });
            }

            let result = match self.run_repetition(j) {
                Ok(result) => result,
                Err(err) => {
                    let message = err.to_string();
                    match self.policy {
                        RepetitionPolicy::Abort => {
                            return Err(TrainingError::RepetitionFailure {
                                repetition: j,
                                message,
                            }
                            .into());
                        }
                        RepetitionPolicy::Isolate => {
                            warn!(repetition = j, error = %message, "repetition failed, continuing");
                            self.emit(RunEvent::RepetitionFailed {
                                repetition: j,
                                message: message.clone(),
                            });
                            outcome.failed_repetitions.push((j, message));
                            continue;
                        }
                    }
                }
            };

            sink.accept(&result)
                .map_err(|e| e.in_stage(PipelineStage::Persistence))?;

            info!(
                repetition = j,
                val_r2 = result.validation.r2,
                test_r2 = result.test.r2,
                "repetition completed"
            );
            self.emit(RunEvent::RepetitionCompleted {
                repetition: j,
                val_r2: result.validation.r2,
                test_r2: result.test.r2,
            });

            let column = format!("rep_{j}");
            outcome
                .importances
                .push_column(column.clone(), result.importances.clone())?;
            outcome
                .predictions
                .push_column(column, result.prediction_series())?;
            outcome.validation_rows.push((j, result.validation));
            outcome.test_rows.push((j, result.test));
        }

        if outcome.validation_rows.is_empty() {
            return Err(TrainingError::NoSuccessfulRepetitions {
                failed: outcome.failed_repetitions.len(),
            }
            .into());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gb_data::split_dataset;
    use gb_types::{Dataset, DenseMatrix, FeatureTable, TargetVector};

    fn split(n: usize, n_test: usize) -> Split {
        let ids: Vec<String> = (0..n).map(|i| format!("id{i}")).collect();
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let t = i as f64 / n as f64;
                vec![t, (t * 7.0).cos(), ((i * 5) % 9) as f64]
            })
            .collect();
        let y: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] - r[1]).collect();
        let table = FeatureTable::new(
            ids.clone(),
            vec!["f0".into(), "f1".into(), "f2".into()],
            DenseMatrix::from_rows(&rows).unwrap(),
        )
        .unwrap();
        let dataset = Dataset::new(table, TargetVector::new(ids.clone(), y).unwrap()).unwrap();
        let test: Vec<String> = ids.iter().step_by(n / n_test).take(n_test).cloned().collect();
        split_dataset(&dataset, &test).unwrap()
    }

    fn params() -> BoostParams {
        BoostParams::default()
            .with_n_estimators(10)
            .with_subsample(0.8)
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<usize>,
    }

    impl RepetitionSink for Recorder {
        fn accept(&mut self, result: &RepetitionResult) -> GbResult<()> {
            self.seen.push(result.repetition);
            Ok(())
        }
    }

    struct FailingSink;

    impl RepetitionSink for FailingSink {
        fn accept(&mut self, _result: &RepetitionResult) -> GbResult<()> {
            Err(GbError::ArtifactPersistence {
                path: "/dev/full".into(),
                message: "disk full".into(),
            })
        }
    }

    #[test]
    fn test_repetitions_fill_tables() {
        let split = split(50, 10);
        let trainer = RepeatedTrainer::new(&split, params(), 5, 3, 1).unwrap();
        let mut sink = Recorder::default();
        let outcome = trainer.run(&mut sink).unwrap();

        assert_eq!(sink.seen, vec![0, 1, 2]);
        assert_eq!(outcome.validation_rows.len(), 3);
        assert_eq!(outcome.test_rows.len(), 3);
        assert_eq!(outcome.predictions.n_rows(), 50);
        assert_eq!(outcome.predictions.column_names(), ["rep_0", "rep_1", "rep_2"]);
        assert_eq!(outcome.importances.n_rows(), 3);

        let imp = outcome.importances.column("rep_0").unwrap();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_repetition_is_reproducible() {
        let split = split(40, 8);
        let trainer = RepeatedTrainer::new(&split, params(), 4, 2, 1).unwrap();
        let a = trainer.run_repetition(1).unwrap();
        let b = trainer.run_repetition(1).unwrap();
        assert_eq!(a.prediction_series(), b.prediction_series());
        assert_eq!(a.model.params().random_state, 1);
    }

    #[test]
    fn test_sink_failure_aborts() {
        let split = split(40, 8);
        let trainer = RepeatedTrainer::new(&split, params(), 4, 2, 1)
            .unwrap()
            .with_policy(RepetitionPolicy::Isolate);
        let err = trainer.run(&mut FailingSink).unwrap_err();
        assert!(matches!(err.root(), GbError::ArtifactPersistence { .. }));
    }

    #[test]
    fn test_isolate_records_failures() {
        let mut split = split(40, 8);
        // An empty test subset cannot be scored.
        split.test = split.test.select_rows(&[]);
        let trainer = RepeatedTrainer::new(&split, params(), 4, 2, 1)
            .unwrap()
            .with_policy(RepetitionPolicy::Isolate);
        let err = trainer.run(&mut NullSink).unwrap_err();
        assert!(matches!(
            err,
            GbError::Training(TrainingError::NoSuccessfulRepetitions { failed: 2 })
        ));

        let trainer = RepeatedTrainer::new(&split, params(), 4, 2, 1).unwrap();
        let err = trainer.run(&mut NullSink).unwrap_err();
        assert!(matches!(
            err,
            GbError::Training(TrainingError::RepetitionFailure { repetition: 0, .. })
        ));
    }

    #[test]
    fn test_cancelled_before_first_repetition() {
        let split = split(40, 8);
        let token = CancellationToken::new();
        token.cancel();
        let trainer = RepeatedTrainer::new(&split, params(), 4, 2, 1)
            .unwrap()
            .with_cancellation(token);
        assert!(matches!(
            trainer.run(&mut NullSink).unwrap_err(),
            GbError::Cancelled {
                stage: PipelineStage::Training
            }
        ));
    }
}
