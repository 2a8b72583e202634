//! End-to-end regression run: split, search, repeated training, aggregation.

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::info;

use gb_data::{split_dataset, ArtifactStore, Split};
use gb_metrics::{aggregate, AggregateResult, RunMetadata, SummaryRow};
use gb_model::BoostParams;
use gb_optimizer::{Optimizer, SearchOutcome, SearchSpace};
use gb_types::{CancellationToken, Dataset, GbResult, PipelineStage, RunConfig, RunEvent};

use crate::objective::{params_from_config, regression_search_space, CvObjective};
use crate::trainer::{NullSink, RepeatedTrainer, RepetitionSink, TrainingOutcome};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub split_sizes: (usize, usize),
    pub search: SearchOutcome,
    pub best_params: BoostParams,
    pub training: TrainingOutcome,
    pub aggregate: AggregateResult,
    pub summary: SummaryRow,
}

pub struct RegressionRun {
    config: RunConfig,
    space: SearchSpace,
    events: Option<Sender<RunEvent>>,
}

impl RegressionRun {
    pub fn new(config: RunConfig) -> GbResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            space: regression_search_space(),
            events: None,
        })
    }

    pub fn with_space(mut self, space: SearchSpace) -> Self {
        self.space = space;
        self
    }

    pub fn with_events(mut self, tx: Sender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn cancellation(&self) -> CancellationToken {
        match self.config.timeout_secs {
            Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
            None => CancellationToken::new(),
        }
    }

    /// Run every stage. When `store` is given, models are written as each
    /// repetition completes, and the tables, the trial history and the
    /// results-log row are written at the end.
    pub fn execute(
        &self,
        dataset: &Dataset,
        test_ids: &[String],
        target: &str,
        store: Option<&mut ArtifactStore>,
    ) -> GbResult<RunReport> {
        let config = &self.config;
        let cancel = self.cancellation();

        let mut metadata = RunMetadata::new(target, config.tag.clone());
        info!(run_id = %metadata.run_id, column = target, tag = %config.tag, "run started");

        let split = split_dataset(dataset, test_ids).map_err(|e| e.in_stage(PipelineStage::Split))?;
        let started = Instant::now();

        let search = self
            .search(&split, &cancel)
            .map_err(|e| e.in_stage(PipelineStage::Search))?;
        let best_params = params_from_config(search.best_params(), 0)
            .map_err(|e| e.in_stage(PipelineStage::Search))?;
        info!(
            best_trial = search.best.number,
            best_score = search.best_score(),
            params = ?search.best_params(),
            "best configuration selected"
        );

        let mut trainer = RepeatedTrainer::new(
            &split,
            best_params.clone(),
            config.folds,
            config.repetitions,
            config.n_jobs,
        )
        .map_err(|e| e.in_stage(PipelineStage::Training))?
        .with_policy(config.repetition_policy)
        .with_cancellation(cancel);
        if let Some(tx) = &self.events {
            trainer = trainer.with_events(tx.clone());
        }

        let mut null_sink = NullSink;
        let mut store = store;
        let sink: &mut dyn RepetitionSink = match store.as_deref_mut() {
            Some(store) => store,
            None => &mut null_sink,
        };
        let training = trainer
            .run(sink)
            .map_err(|e| e.in_stage(PipelineStage::Training))?;
        let run_time = started.elapsed().as_secs_f64();

        let aggregate = aggregate(&training.metric_pairs())
            .map_err(|e| e.in_stage(PipelineStage::Aggregation))?;
        metadata.run_time_secs = run_time;
        metadata.n_train = split.n_train();
        metadata.n_features = dataset.n_features();
        metadata.folds = config.folds;
        metadata.repetitions = config.repetitions;
        let summary = SummaryRow::new(metadata, aggregate.clone());
        info!(
            run_id = %summary.metadata.run_id,
            repetitions = aggregate.n_repetitions,
            val_r2 = aggregate.validation.r2.mean,
            val_r2_sd = aggregate.validation.r2.sd,
            test_r2 = aggregate.test.r2.mean,
            test_r2_sd = aggregate.test.r2.sd,
            run_time,
            "run aggregated"
        );

        if let Some(store) = store {
            persist(store, &search, &training, &summary)
                .map_err(|e| e.in_stage(PipelineStage::Persistence))?;
        }

        Ok(RunReport {
            split_sizes: (split.n_train(), split.n_test()),
            search,
            best_params,
            training,
            aggregate,
            summary,
        })
    }

    fn search(&self, split: &Split, cancel: &CancellationToken) -> GbResult<SearchOutcome> {
        let search_config = &self.config.search;
        let objective = CvObjective::from_config(
            &split.train,
            self.config.folds,
            search_config,
            self.config.n_jobs,
        )?;
        let mut optimizer = Optimizer::from_config(self.space.clone(), search_config)?
            .with_cancellation(cancel.clone());
        if let Some(tx) = &self.events {
            optimizer = optimizer.with_events(tx.clone());
        }
        optimizer.minimize(&objective)
    }
}

fn persist(
    store: &ArtifactStore,
    search: &SearchOutcome,
    training: &TrainingOutcome,
    summary: &SummaryRow,
) -> GbResult<()> {
    store.write_search(search)?;
    store.write_importances(&training.importances)?;
    store.write_predictions(&training.predictions)?;
    store.write_metric_rows("val", &training.validation_rows)?;
    store.write_metric_rows("test", &training.test_rows)?;
    store.write_run_summary(summary)?;
    store.append_summary(summary)?;
    info!(dir = %store.dir().display(), "artifacts written");
    Ok(())
}
