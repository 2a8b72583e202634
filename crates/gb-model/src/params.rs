//! Hyperparameters of the boosted ensemble.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use gb_types::{GbError, GbResult, ModelError};

/// Default α for the huber and quantile losses.
pub const DEFAULT_ALPHA: f64 = 0.9;

/// Loss function optimised by the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossKind {
    SquaredError,
    AbsoluteError,
    /// Squared error near zero, absolute error beyond the α-quantile of the
    /// absolute residuals.
    Huber { alpha: f64 },
    /// Pinball loss for the α-quantile.
    Quantile { alpha: f64 },
}

impl LossKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SquaredError => "squared_error",
            Self::AbsoluteError => "absolute_error",
            Self::Huber { .. } => "huber",
            Self::Quantile { .. } => "quantile",
        }
    }

    fn alpha(&self) -> Option<f64> {
        match self {
            Self::Huber { alpha } | Self::Quantile { alpha } => Some(*alpha),
            _ => None,
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = GbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "squared_error" | "ls" => Ok(Self::SquaredError),
            "absolute_error" | "lad" => Ok(Self::AbsoluteError),
            "huber" => Ok(Self::Huber {
                alpha: DEFAULT_ALPHA,
            }),
            "quantile" => Ok(Self::Quantile {
                alpha: DEFAULT_ALPHA,
            }),
            other => Err(ModelError::InvalidParams {
                message: format!("unknown loss: {other}"),
            }
            .into()),
        }
    }
}

/// Quality measure used to pick tree splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitCriterion {
    /// Friedman's improvement score: mean difference weighted by child sizes.
    FriedmanMse,
    SquaredError,
}

impl SplitCriterion {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FriedmanMse => "friedman_mse",
            Self::SquaredError => "squared_error",
        }
    }
}

impl fmt::Display for SplitCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SplitCriterion {
    type Err = GbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "friedman_mse" => Ok(Self::FriedmanMse),
            "squared_error" | "mse" => Ok(Self::SquaredError),
            other => Err(ModelError::InvalidParams {
                message: format!("unknown split criterion: {other}"),
            }
            .into()),
        }
    }
}

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    All,
    /// `max(1, floor(fraction * n_features))`.
    Fraction(f64),
    Count(usize),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let k = match *self {
            Self::All => n_features,
            Self::Fraction(f) => (f * n_features as f64).floor() as usize,
            Self::Count(c) => c,
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Full hyperparameter set of a [`GradientBoostingRegressor`](crate::GradientBoostingRegressor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostParams {
    pub loss: LossKind,
    /// Shrinkage applied to every tree's contribution.
    pub learning_rate: f64,
    /// Number of boosting stages.
    pub n_estimators: usize,
    pub criterion: SplitCriterion,
    pub max_depth: usize,
    pub max_features: MaxFeatures,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) for each stage.
    pub subsample: f64,
    /// Seed of every random choice made while fitting.
    pub random_state: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        Self {
            loss: LossKind::SquaredError,
            learning_rate: 0.1,
            n_estimators: 100,
            criterion: SplitCriterion::FriedmanMse,
            max_depth: 3,
            max_features: MaxFeatures::All,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
            random_state: 0,
        }
    }
}

impl BoostParams {
    pub fn with_loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_subsample(mut self, subsample: f64) -> Self {
        self.subsample = subsample;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn validate(&self) -> GbResult<()> {
        let invalid = |message: String| -> GbResult<()> {
            Err(ModelError::InvalidParams { message }.into())
        };

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.n_estimators == 0 {
            return invalid("n_estimators must be positive".into());
        }
        if self.max_depth == 0 {
            return invalid("max_depth must be positive".into());
        }
        if self.min_samples_split < 2 {
            return invalid("min_samples_split must be at least 2".into());
        }
        if self.min_samples_leaf == 0 {
            return invalid("min_samples_leaf must be positive".into());
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return invalid(format!("subsample must lie in (0, 1], got {}", self.subsample));
        }
        match self.max_features {
            MaxFeatures::Fraction(f) if !(0.0..=1.0).contains(&f) => {
                return invalid(format!("max_features fraction must lie in [0, 1], got {f}"));
            }
            MaxFeatures::Count(0) => return invalid("max_features count must be positive".into()),
            _ => {}
        }
        if let Some(alpha) = self.loss.alpha() {
            if !(alpha > 0.0 && alpha < 1.0) {
                return invalid(format!("loss alpha must lie in (0, 1), got {alpha}"));
            }
        }
        Ok(())
    }
}
