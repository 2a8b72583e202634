//! Run configuration: fold/repetition counts, search budget, seeds and
//! failure policies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::errors::{GbError, GbResult};

/// Which search strategy drives the hyperparameter optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Tree-structured Parzen estimator (sequential model-based).
    Tpe,
    Random,
    Grid,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Tpe
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tpe => "tpe",
            Self::Random => "random",
            Self::Grid => "grid",
        })
    }
}

impl FromStr for StrategyKind {
    type Err = GbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tpe" | "bayesian" => Ok(Self::Tpe),
            "random" => Ok(Self::Random),
            "grid" => Ok(Self::Grid),
            other => Err(GbError::Config(format!("unknown search strategy: {other}"))),
        }
    }
}

/// What the optimizer does when evaluating a trial fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialErrorPolicy {
    /// Abort the whole search on the first failure.
    Abort,
    /// Record the trial as failed and keep searching.
    Skip,
}

impl Default for TrialErrorPolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// What the repeated trainer does when a repetition fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepetitionPolicy {
    /// Stop the run at the first failed repetition.
    Abort,
    /// Record the failure and continue with the next repetition.
    Isolate,
}

impl Default for RepetitionPolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// Hyperparameter search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of trials to evaluate.
    pub budget: usize,
    pub strategy: StrategyKind,
    /// Seed of the shuffled K-fold partition used by the CV objective.
    pub cv_seed: u64,
    /// Seed of the search strategy's own sampling.
    pub search_seed: u64,
    /// `random_state` of models fitted while scoring candidates.
    pub model_seed: u64,
    /// Random proposals before TPE starts modelling the history.
    pub startup_trials: usize,
    /// Quantile separating "good" from "bad" trials in TPE.
    pub gamma: f64,
    /// Candidates drawn per continuous dimension when maximising l(x)/g(x).
    pub ei_candidates: usize,
    /// Points per continuous dimension for grid search.
    pub grid_steps: usize,
    pub trial_error_policy: TrialErrorPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            budget: 100,
            strategy: StrategyKind::Tpe,
            cv_seed: 42,
            search_seed: 42,
            model_seed: 42,
            startup_trials: 20,
            gamma: 0.25,
            ei_candidates: 24,
            grid_steps: 5,
            trial_error_policy: TrialErrorPolicy::Abort,
        }
    }
}

/// Top-level configuration for a regression run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// k for both the search objective and the out-of-fold predictions.
    pub folds: usize,
    /// Number of repeated fits of the best configuration.
    pub repetitions: usize,
    /// Worker threads for fold fits: 0 = auto, 1 = sequential.
    pub n_jobs: usize,
    /// Free-form annotation written to the results log.
    pub tag: String,
    /// Wall-clock limit for the whole run, checked between trials and
    /// repetitions.
    pub timeout_secs: Option<u64>,
    pub repetition_policy: RepetitionPolicy,
    pub search: SearchConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            repetitions: 10,
            n_jobs: 0,
            tag: String::new(),
            timeout_secs: None,
            repetition_policy: RepetitionPolicy::Abort,
            search: SearchConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> GbResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_repetitions(mut self, n: usize) -> Self {
        self.repetitions = n;
        self
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.search.budget = budget;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.search.strategy = strategy;
        self
    }

    pub fn with_seeds(mut self, cv_seed: u64, search_seed: u64) -> Self {
        self.search.cv_seed = cv_seed;
        self.search.search_seed = search_seed;
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_repetition_policy(mut self, policy: RepetitionPolicy) -> Self {
        self.repetition_policy = policy;
        self
    }

    pub fn with_trial_error_policy(mut self, policy: TrialErrorPolicy) -> Self {
        self.search.trial_error_policy = policy;
        self
    }

    pub fn validate(&self) -> GbResult<()> {
        if self.folds < 2 {
            return Err(GbError::Config(format!(
                "folds must be at least 2, got {}",
                self.folds
            )));
        }
        if self.repetitions == 0 {
            return Err(GbError::Config("repetitions must be positive".into()));
        }
        let search = &self.search;
        if search.budget == 0 {
            return Err(GbError::Config("search budget must be positive".into()));
        }
        if !(search.gamma > 0.0 && search.gamma < 1.0) {
            return Err(GbError::Config(format!(
                "gamma must lie in (0, 1), got {}",
                search.gamma
            )));
        }
        if search.startup_trials == 0 {
            return Err(GbError::Config("startup_trials must be positive".into()));
        }
        if search.ei_candidates == 0 {
            return Err(GbError::Config("ei_candidates must be positive".into()));
        }
        if search.grid_steps < 2 {
            return Err(GbError::Config("grid_steps must be at least 2".into()));
        }
        Ok(())
    }
}
