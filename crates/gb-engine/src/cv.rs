//! K-fold partitioning and cross-validated fitting.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use gb_metrics::RegressionMetrics;
use gb_model::{BoostParams, GradientBoostingRegressor};
use gb_types::{GbResult, Subset, TrainingError};

use crate::parallel::FoldExecutor;

/// One train/validation partition of `0..n_samples`. Both index lists are
/// ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// K-fold splitter. The first `n % k` folds hold one extra sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    n_splits: usize,
    shuffle_seed: Option<u64>,
}

impl KFold {
    /// Contiguous, unshuffled folds.
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle_seed: None,
        }
    }

    /// Folds drawn from a seeded permutation of the samples.
    pub fn shuffled(n_splits: usize, seed: u64) -> Self {
        Self {
            n_splits,
            shuffle_seed: Some(seed),
        }
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    pub fn split(&self, n_samples: usize) -> GbResult<Vec<Fold>> {
        if self.n_splits < 2 || self.n_splits > n_samples {
            return Err(TrainingError::InvalidFoldCount {
                folds: self.n_splits,
                samples: n_samples,
            }
            .into());
        }

        let mut order: Vec<usize> = (0..n_samples).collect();
        if let Some(seed) = self.shuffle_seed {
            order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        }

        let base = n_samples / self.n_splits;
        let extra = n_samples % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for index in 0..self.n_splits {
            let size = base + usize::from(index < extra);
            let mut in_fold = vec![false; n_samples];
            for &i in &order[start..start + size] {
                in_fold[i] = true;
            }
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..n_samples).partition(|&i| in_fold[i]);
            folds.push(Fold {
                index,
                train,
                validation,
            });
            start += size;
        }
        Ok(folds)
    }
}

fn fit_fold(params: &BoostParams, data: &Subset, fold: &Fold) -> GbResult<Vec<f64>> {
    let train = data.select_rows(&fold.train);
    let validation = data.select_rows(&fold.validation);
    let mut model = GradientBoostingRegressor::new(params.clone())?;
    model.fit_subset(&train)?;
    model.predict(validation.features())
}

fn fold_failure(fold: &Fold) -> impl FnOnce(gb_types::GbError) -> gb_types::GbError + '_ {
    move |err| {
        TrainingError::FoldFailure {
            fold: fold.index,
            message: err.to_string(),
        }
        .into()
    }
}

/// Out-of-fold predictions: every sample is predicted by the model fitted
/// without its fold.
pub fn cross_val_predict(
    params: &BoostParams,
    data: &Subset,
    folds: &[Fold],
    executor: &FoldExecutor,
) -> GbResult<Vec<f64>> {
    let per_fold = executor.run(folds, |fold| {
        fit_fold(params, data, fold).map_err(fold_failure(fold))
    })?;

    let mut predictions = vec![f64::NAN; data.len()];
    for (fold, preds) in folds.iter().zip(per_fold) {
        for (&row, p) in fold.validation.iter().zip(preds) {
            predictions[row] = p;
        }
    }
    Ok(predictions)
}

/// R² of each fold's model on its held-out rows, in fold order.
pub fn cross_val_r2(
    params: &BoostParams,
    data: &Subset,
    folds: &[Fold],
    executor: &FoldExecutor,
) -> GbResult<Vec<f64>> {
    executor.run(folds, |fold| {
        let preds = fit_fold(params, data, fold).map_err(fold_failure(fold))?;
        let actual: Vec<f64> = fold.validation.iter().map(|&r| data.target()[r]).collect();
        let r2 = RegressionMetrics::compute(&actual, &preds)
            .map_err(fold_failure(fold))?
            .r2;
        debug!(fold = fold.index, r2, "fold scored");
        Ok(r2)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gb_types::{DenseMatrix, GbError};

    fn subset(n: usize) -> Subset {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64, ((i * 7) % 11) as f64])
            .collect();
        let y: Vec<f64> = (0..n).map(|i| 2.0 * i as f64 + ((i * 7) % 11) as f64).collect();
        Subset::new(
            (0..n).map(|i| format!("s{i}")).collect(),
            vec!["a".into(), "b".into()],
            DenseMatrix::from_rows(&rows).unwrap(),
            y,
        )
        .unwrap()
    }

    #[test]
    fn test_unshuffled_folds_are_contiguous() {
        let folds = KFold::new(3).split(10).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.validation.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(folds[0].validation, vec![0, 1, 2, 3]);
        assert_eq!(folds[1].validation, vec![4, 5, 6]);
        assert_eq!(folds[2].train, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_shuffled_folds_partition_samples() {
        let folds = KFold::shuffled(5, 42).split(23).unwrap();
        let mut seen = vec![0; 23];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.validation.len(), 23);
            assert!(fold.validation.windows(2).all(|w| w[0] < w[1]));
            for &i in &fold.validation {
                seen[i] += 1;
                assert!(!fold.train.contains(&i));
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_ne!(folds[0].validation, vec![0, 1, 2, 3, 4]);
        assert_eq!(folds, KFold::shuffled(5, 42).split(23).unwrap());
    }

    #[test]
    fn test_invalid_fold_counts() {
        assert!(matches!(
            KFold::new(1).split(10).unwrap_err(),
            GbError::Training(TrainingError::InvalidFoldCount { folds: 1, samples: 10 })
        ));
        assert!(KFold::new(6).split(5).is_err());
    }

    #[test]
    fn test_oof_predictions_cover_every_row() {
        let data = subset(30);
        let folds = KFold::new(5).split(data.len()).unwrap();
        let params = BoostParams::default().with_n_estimators(10);
        let preds = cross_val_predict(&params, &data, &folds, &FoldExecutor::sequential()).unwrap();
        assert_eq!(preds.len(), 30);
        assert!(preds.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let data = subset(40);
        let folds = KFold::shuffled(4, 7).split(data.len()).unwrap();
        let params = BoostParams::default()
            .with_n_estimators(15)
            .with_subsample(0.8)
            .with_random_state(3);
        let seq = cross_val_r2(&params, &data, &folds, &FoldExecutor::sequential()).unwrap();
        let par = cross_val_r2(&params, &data, &folds, &FoldExecutor::new(4, folds.len()).unwrap())
            .unwrap();
        assert_eq!(seq, par);
    }
}
