//! Cross-validated R² as a search objective.

use tracing::debug;

use gb_model::{BoostParams, LossKind, MaxFeatures, SplitCriterion};
use gb_optimizer::{Objective, ParamSet, ParameterValue, SearchSpace};
use gb_types::{GbResult, SearchConfig, SearchError, Subset};

use crate::cv::{cross_val_r2, Fold, KFold};
use crate::parallel::FoldExecutor;

/// The default space searched for a regression run.
pub fn regression_search_space() -> SearchSpace {
    SearchSpace::new()
        .add_fixed("loss", "absolute_error")
        .add_uniform("learning_rate", 0.01, 0.5)
        .add_quantized_int("n_estimators", 50, 500, 2)
        .add_fixed("criterion", "friedman_mse")
        .add_quantized_int("max_depth", 3, 15, 1)
        .add_uniform("max_features", 0.0, 1.0)
}

fn invalid(name: &str, message: impl Into<String>) -> SearchError {
    SearchError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}

fn positive_int(name: &str, value: &ParameterValue) -> GbResult<usize> {
    match value.as_i64() {
        Some(v) if v > 0 => Ok(v as usize),
        _ => Err(invalid(name, format!("expected a positive integer, got {value}")).into()),
    }
}

fn float(name: &str, value: &ParameterValue) -> GbResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| invalid(name, format!("expected a number, got {value}")).into())
}

fn text<'a>(name: &str, value: &'a ParameterValue) -> GbResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| invalid(name, format!("expected a string, got {value}")).into())
}

/// Turn a materialised configuration into model parameters. Keys that are
/// not set keep the model defaults; unknown keys are rejected.
pub fn params_from_config(config: &ParamSet, random_state: u64) -> GbResult<BoostParams> {
    let mut params = BoostParams::default().with_random_state(random_state);
    for (name, value) in config {
        match name.as_str() {
            "loss" => params.loss = text(name, value)?.parse::<LossKind>()?,
            "learning_rate" => params.learning_rate = float(name, value)?,
            "n_estimators" => params.n_estimators = positive_int(name, value)?,
            "criterion" => params.criterion = text(name, value)?.parse::<SplitCriterion>()?,
            "max_depth" => params.max_depth = positive_int(name, value)?,
            "max_features" => {
                params.max_features = match value {
                    ParameterValue::Float(f) => MaxFeatures::Fraction(*f),
                    ParameterValue::Int(_) => MaxFeatures::Count(positive_int(name, value)?),
                    ParameterValue::Text(s) if s == "all" => MaxFeatures::All,
                    other => return Err(invalid(name, format!("unsupported value {other}")).into()),
                }
            }
            "min_samples_split" => params.min_samples_split = positive_int(name, value)?,
            "min_samples_leaf" => params.min_samples_leaf = positive_int(name, value)?,
            "subsample" => params.subsample = float(name, value)?,
            other => return Err(invalid(other, "not a model hyperparameter").into()),
        }
    }
    params.validate()?;
    Ok(params)
}

/// Scores configurations by `-mean(R²)` over k shuffled folds of the
/// training subset. The folds are drawn once, so every configuration sees
/// the same partition.
#[derive(Debug)]
pub struct CvObjective<'a> {
    data: &'a Subset,
    folds: Vec<Fold>,
    executor: FoldExecutor,
    model_seed: u64,
}

impl<'a> CvObjective<'a> {
    pub fn new(
        data: &'a Subset,
        n_folds: usize,
        cv_seed: u64,
        model_seed: u64,
        n_jobs: usize,
    ) -> GbResult<Self> {
        let folds = KFold::shuffled(n_folds, cv_seed).split(data.len())?;
        let executor = FoldExecutor::new(n_jobs, folds.len())?;
        Ok(Self {
            data,
            folds,
            executor,
            model_seed,
        })
    }

    pub fn from_config(
        data: &'a Subset,
        n_folds: usize,
        config: &SearchConfig,
        n_jobs: usize,
    ) -> GbResult<Self> {
        Self::new(data, n_folds, config.cv_seed, config.model_seed, n_jobs)
    }

    pub fn folds(&self) -> &[Fold] {
        &self.folds
    }

    /// Per-fold R² of one configuration.
    pub fn fold_scores(&self, config: &ParamSet) -> GbResult<Vec<f64>> {
        let params = params_from_config(config, self.model_seed)?;
        cross_val_r2(&params, self.data, &self.folds, &self.executor)
    }
}

impl Objective for CvObjective<'_> {
    fn evaluate(&self, params: &ParamSet) -> GbResult<f64> {
        let scores = self.fold_scores(params)?;
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        debug!(mean_r2 = mean, "configuration scored");
        Ok(-mean)
    }
}
