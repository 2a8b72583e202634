//! The sequential optimizer loop: propose, materialise, evaluate, record.

use chrono::Utc;
use crossbeam_channel::Sender;
use std::time::Instant;
use tracing::{debug, info, warn};

use gb_types::{
    CancellationToken, GbError, GbResult, PipelineStage, RunEvent, SearchConfig, SearchError,
    StrategyKind, TrialErrorPolicy,
};

use crate::search::{GridSearch, RandomSearch, SearchStrategy};
use crate::space::{ParamSet, SearchSpace};
use crate::tpe::{TpeConfig, TpeSearch};
use crate::trial::{best_trial, SearchOutcome, Trial};

/// Something the optimizer can minimise.
pub trait Objective {
    fn evaluate(&self, params: &ParamSet) -> GbResult<f64>;
}

impl<F> Objective for F
where
    F: Fn(&ParamSet) -> GbResult<f64>,
{
    fn evaluate(&self, params: &ParamSet) -> GbResult<f64> {
        self(params)
    }
}

/// Build the configured strategy over `space`.
pub fn build_strategy(
    space: &SearchSpace,
    config: &SearchConfig,
) -> GbResult<Box<dyn SearchStrategy>> {
    Ok(match config.strategy {
        StrategyKind::Tpe => Box::new(TpeSearch::new(
            space.clone(),
            TpeConfig::from(config),
            config.search_seed,
        )?),
        StrategyKind::Random => Box::new(RandomSearch::new(space.clone(), config.search_seed)?),
        StrategyKind::Grid => Box::new(GridSearch::new(space, config.grid_steps)?),
    })
}

/// Drives a [`SearchStrategy`] against an [`Objective`] for a fixed budget.
pub struct Optimizer {
    space: SearchSpace,
    strategy: Box<dyn SearchStrategy>,
    budget: usize,
    policy: TrialErrorPolicy,
    cancel: CancellationToken,
    events: Option<Sender<RunEvent>>,
}

impl Optimizer {
    pub fn new(
        space: SearchSpace,
        strategy: Box<dyn SearchStrategy>,
        budget: usize,
    ) -> GbResult<Self> {
        space.validate()?;
        if budget == 0 {
            return Err(GbError::Config("search budget must be positive".into()));
        }
        Ok(Self {
            space,
            strategy,
            budget,
            policy: TrialErrorPolicy::Abort,
            cancel: CancellationToken::new(),
            events: None,
        })
    }

    pub fn from_config(space: SearchSpace, config: &SearchConfig) -> GbResult<Self> {
        let strategy = build_strategy(&space, config)?;
        Ok(Self::new(space, strategy, config.budget)?.with_policy(config.trial_error_policy))
    }

    pub fn with_policy(mut self, policy: TrialErrorPolicy) -> Self {
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

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run the search to completion and return the lowest-scoring trial
    /// together with the full history.
    pub fn minimize<O: Objective + ?Sized>(&mut self, objective: &O) -> GbResult<SearchOutcome> {
        let started_at = Utc::now();
        let strategy_name = self.strategy.name().to_string();
        info!(strategy = %strategy_name, budget = self.budget, "hyperparameter search started");
        self.emit(RunEvent::SearchStarted {
            strategy: strategy_name.clone(),
            budget: self.budget,
        });

        let mut history: Vec<Trial> = Vec::with_capacity(self.budget);
        for number in 0..self.budget {
            if self.cancel.is_cancelled() {
                warn!(completed = history.len(), "search cancelled");
                return Err(GbError::Cancelled {
                    stage: PipelineStage::Search,
                });
            }

            let proposal = self.strategy.propose(&history)?;
            let params = self.space.materialize(&proposal)?;

            let start = Instant::now();
            let result = objective.evaluate(&params).and_then(|score| {
                if score.is_finite() {
                    Ok(score)
                } else {
                    Err(GbError::Validation(format!("objective returned {score}")))
                }
            });
            let elapsed = start.elapsed().as_secs_f64();

            let trial = match result {
                Ok(score) => {
                    let trial = Trial::completed(number, params, score, elapsed);
                    let best = best_trial(&history)
                        .and_then(|t| t.score)
                        .map_or(score, |b| b.min(score));
                    debug!(trial = number, score, best, "trial completed");
                    self.emit(RunEvent::TrialCompleted {
                        number,
                        score,
                        best_score: best,
                    });
                    trial
                }
                Err(err) => {
                    let message = err.to_string();
                    match self.policy {
                        TrialErrorPolicy::Abort => {
                            return Err(SearchError::ObjectiveEvaluationFailure {
                                trial: number,
                                message,
                            }
                            .into());
                        }
                        TrialErrorPolicy::Skip => {
                            warn!(trial = number, error = %message, "trial failed, skipping");
                            self.emit(RunEvent::TrialFailed {
                                number,
                                message: message.clone(),
                            });
                            Trial::failed(number, params, message, elapsed)
                        }
                    }
                }
            };
            self.strategy.record(&trial);
            history.push(trial);
        }

        let best = best_trial(&history)
            .cloned()
            .ok_or(SearchError::AllTrialsFailed {
                trials: history.len(),
            })?;
        let outcome = SearchOutcome {
            strategy: strategy_name,
            best,
            history,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            best_trial = outcome.best.number,
            best_score = outcome.best_score(),
            failed = outcome.n_failed(),
            "hyperparameter search finished"
        );
        self.emit(RunEvent::SearchFinished {
            best_score: outcome.best_score(),
            trials: outcome.history.len(),
            failed: outcome.n_failed(),
        });
        Ok(outcome)
    }
}
