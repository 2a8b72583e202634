//! Gradient-boosted ensemble of regression trees.

use std::collections::BTreeMap;

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use gb_types::{DataError, DenseMatrix, GbResult, ModelError, Subset};

use crate::params::BoostParams;
use crate::tree::{RegressionTree, TreeBuilder};

/// Gradient-boosted ensemble of regression trees.
///
/// Construct with [`GradientBoostingRegressor::new`], then [`fit`](Self::fit).
/// All randomness (row subsampling and per-split feature draws) comes from
/// `params.random_state`, so identical inputs give identical models.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostingRegressor {
    params: BoostParams,
    fitted: Option<FittedState>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FittedState {
    pub init_estimate: f64,
    pub trees: Vec<RegressionTree>,
    pub feature_names: Vec<String>,
    pub feature_importances: Vec<f64>,
    pub train_loss: Vec<f64>,
}

impl GradientBoostingRegressor {
    pub fn new(params: BoostParams) -> GbResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            fitted: None,
        })
    }

    pub(crate) fn from_parts(params: BoostParams, state: FittedState) -> Self {
        Self {
            params,
            fitted: Some(state),
        }
    }

    pub fn params(&self) -> &BoostParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub(crate) fn state(&self) -> GbResult<&FittedState> {
        self.fitted.as_ref().ok_or_else(|| ModelError::NotFitted.into())
    }

    /// Fit on a training subset, using its feature names.
    pub fn fit_subset(&mut self, subset: &Subset) -> GbResult<()> {
        self.fit(subset.features(), subset.target(), subset.feature_names())
    }

    pub fn fit(&mut self, x: &DenseMatrix, y: &[f64], feature_names: &[String]) -> GbResult<()> {
        let n = x.n_rows();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet.into());
        }
        if y.len() != n {
            return Err(DataError::InvalidFormat {
                message: format!("{n} feature rows but {} target values", y.len()),
            }
            .into());
        }
        if feature_names.len() != x.n_cols() {
            return Err(ModelError::FeatureMismatch {
                expected: feature_names.len(),
                got: x.n_cols(),
            }
            .into());
        }
        if x.n_cols() == 0 {
            return Err(DataError::InsufficientData {
                message: "no feature columns".into(),
            }
            .into());
        }
        if x.as_slice().iter().chain(y).any(|v| !v.is_finite()) {
            return Err(DataError::InvalidFormat {
                message: "training data contains non-finite values".into(),
            }
            .into());
        }

        let p = &self.params;
        let loss = p.loss;
        let n_features = x.n_cols();
        let max_features = p.max_features.resolve(n_features);
        let n_inbag = ((p.subsample * n as f64) as usize).max(1);
        let mut rng = ChaCha8Rng::seed_from_u64(p.random_state);

        let init_estimate = loss.init_estimate(y);
        let mut raw = vec![init_estimate; n];
        let mut trees = Vec::with_capacity(p.n_estimators);
        let mut train_loss = Vec::with_capacity(p.n_estimators);

        for stage in 0..p.n_estimators {
            let residuals = loss.negative_gradient(y, &raw);
            let rows: Vec<usize> = if n_inbag < n {
                let mut rows = index::sample(&mut rng, n, n_inbag).into_vec();
                rows.sort_unstable();
                rows
            } else {
                (0..n).collect()
            };

            let builder = TreeBuilder {
                x,
                target: &residuals.values,
                criterion: p.criterion,
                max_depth: p.max_depth,
                min_samples_split: p.min_samples_split,
                min_samples_leaf: p.min_samples_leaf,
                max_features,
            };
            let mut tree = builder.build(rows.clone(), &mut rng);

            // Line search per leaf over the in-bag rows.
            let mut by_leaf: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
            for &r in &rows {
                by_leaf
                    .entry(tree.leaf_index(x.row(r)))
                    .or_default()
                    .push(y[r] - raw[r]);
            }
            for (leaf, diffs) in &by_leaf {
                tree.set_leaf_value(*leaf, loss.leaf_value(diffs, residuals.delta));
            }

            for (i, value) in raw.iter_mut().enumerate() {
                *value += p.learning_rate * tree.predict_row(x.row(i));
            }
            let stage_loss = loss.loss(y, &raw);
            debug!(stage, leaves = tree.n_leaves(), loss = stage_loss, "boosting stage");
            train_loss.push(stage_loss);
            trees.push(tree);
        }

        let feature_importances = mean_importances(&trees, n_features);
        self.fitted = Some(FittedState {
            init_estimate,
            trees,
            feature_names: feature_names.to_vec(),
            feature_importances,
            train_loss,
        });
        Ok(())
    }

    pub fn predict(&self, x: &DenseMatrix) -> GbResult<Vec<f64>> {
        let state = self.state()?;
        if x.n_cols() != state.feature_names.len() {
            return Err(ModelError::FeatureMismatch {
                expected: state.feature_names.len(),
                got: x.n_cols(),
            }
            .into());
        }
        if x.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(DataError::InvalidFormat {
                message: "prediction data contains non-finite values".into(),
            }
            .into());
        }
        let lr = self.params.learning_rate;
        Ok(x.rows()
            .map(|row| {
                state.init_estimate
                    + state
                        .trees
                        .iter()
                        .map(|t| lr * t.predict_row(row))
                        .sum::<f64>()
            })
            .collect())
    }

    /// Normalised impurity-based importances, aligned with
    /// [`feature_names`](Self::feature_names).
    pub fn feature_importances(&self) -> GbResult<&[f64]> {
        Ok(&self.state()?.feature_importances)
    }

    pub fn feature_names(&self) -> GbResult<&[String]> {
        Ok(&self.state()?.feature_names)
    }

    pub fn init_estimate(&self) -> GbResult<f64> {
        Ok(self.state()?.init_estimate)
    }

    pub fn trees(&self) -> GbResult<&[RegressionTree]> {
        Ok(&self.state()?.trees)
    }

    /// Training loss after each stage.
    pub fn train_loss(&self) -> GbResult<&[f64]> {
        Ok(&self.state()?.train_loss)
    }
}

/// Average the per-tree impurity decreases over trees that split at least
/// once, then normalise to sum 1.
pub(crate) fn mean_importances(trees: &[RegressionTree], n_features: usize) -> Vec<f64> {
    let mut total = vec![0.0; n_features];
    let mut counted = 0usize;
    for tree in trees.iter().filter(|t| t.n_nodes() > 1) {
        for (acc, v) in total.iter_mut().zip(tree.impurity_decrease(n_features)) {
            *acc += v;
        }
        counted += 1;
    }
    if counted == 0 {
        return total;
    }
    for v in &mut total {
        *v /= counted as f64;
    }
    let sum: f64 = total.iter().sum();
    if sum > 0.0 {
        for v in &mut total {
            *v /= sum;
        }
    }
    total
}
