//! Gradient-boosted regression trees.
//!
//! The ensemble follows the usual stagewise recipe: start from the loss's
//! optimal constant, fit a small regression tree to the negative gradient,
//! replace its leaf values by the loss's line-search update, and add it
//! scaled by the learning rate.

pub mod artifact;
pub mod ensemble;
mod loss;
pub mod params;
pub mod tree;

pub use artifact::{ModelArtifact, ARTIFACT_FORMAT, ARTIFACT_VERSION};
pub use ensemble::GradientBoostingRegressor;
pub use params::{BoostParams, LossKind, MaxFeatures, SplitCriterion, DEFAULT_ALPHA};
pub use tree::{Node, RegressionTree};
