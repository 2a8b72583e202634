//! GradBoost regression engine.
//!
//! Wires the pieces of a run together: K-fold partitioning and a bounded
//! fold worker pool, the cross-validated search objective, the repeated
//! trainer, and the end-to-end [`RegressionRun`].

pub mod cv;
pub mod objective;
pub mod parallel;
pub mod pipeline;
pub mod trainer;

pub use cv::{cross_val_predict, cross_val_r2, Fold, KFold};
pub use objective::{params_from_config, regression_search_space, CvObjective};
pub use parallel::{FoldExecutor, Parallelism};
pub use pipeline::{RegressionRun, RunReport};
pub use trainer::{NullSink, RepeatedTrainer, RepetitionResult, RepetitionSink, TrainingOutcome};
