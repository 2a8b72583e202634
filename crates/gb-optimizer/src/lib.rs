//! # gb-optimizer
//!
//! Hyperparameter search for GradBoost.
//!
//! Provides search space definitions, search strategies (TPE, random, grid),
//! trial tracking, and the sequential optimizer loop that drives a strategy
//! against a cross-validated objective.

mod optimizer;
mod search;
mod space;
mod tpe;
mod trial;

pub use optimizer::{build_strategy, Objective, Optimizer};
pub use search::{GridSearch, RandomSearch, SearchStrategy};
pub use space::{Dimension, ParamSet, ParameterDef, ParameterValue, SearchSpace};
pub use tpe::{TpeConfig, TpeSearch};
pub use trial::{best_trial, SearchOutcome, Trial, TrialStatus};
