//! Bounded worker pool for fold fits.
//!
//! Threading contract:
//! - `n_jobs == 0`: one worker per fold, capped by the available cores
//! - `n_jobs == 1`: strictly sequential, no pool is built
//! - `n_jobs > 1`: at most `min(n_jobs, n_folds)` workers
//!
//! Results always come back in fold order, so parallel and sequential runs
//! produce identical numbers.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use gb_types::{internal_error, GbResult};

use crate::cv::Fold;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    /// Up to `n` worker threads.
    Parallel(usize),
}

impl Parallelism {
    pub fn for_folds(n_jobs: usize, n_folds: usize) -> Self {
        let cap = match n_jobs {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        match cap.min(n_folds) {
            0 | 1 => Self::Sequential,
            n => Self::Parallel(n),
        }
    }

    pub fn n_threads(self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel(n) => n.max(1),
        }
    }
}

/// Runs one closure per fold, on a dedicated pool when parallel.
pub struct FoldExecutor {
    parallelism: Parallelism,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for FoldExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoldExecutor")
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

impl FoldExecutor {
    pub fn new(n_jobs: usize, n_folds: usize) -> GbResult<Self> {
        let parallelism = Parallelism::for_folds(n_jobs, n_folds);
        let pool = match parallelism {
            Parallelism::Sequential => None,
            Parallelism::Parallel(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("gb-fold-{i}"))
                    .build()
                    .map_err(|e| internal_error!("failed to build fold worker pool: {}", e))?,
            ),
        };
        debug!(threads = parallelism.n_threads(), "fold executor ready");
        Ok(Self { parallelism, pool })
    }

    pub fn sequential() -> Self {
        Self {
            parallelism: Parallelism::Sequential,
            pool: None,
        }
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Apply `task` to every fold. On failure the error of the lowest-indexed
    /// failing fold is returned.
    pub fn run<T, F>(&self, folds: &[Fold], task: F) -> GbResult<Vec<T>>
    where
        T: Send,
        F: Fn(&Fold) -> GbResult<T> + Sync,
    {
        let results: Vec<GbResult<T>> = match &self.pool {
            Some(pool) => pool.install(|| folds.par_iter().map(&task).collect()),
            None => folds.iter().map(&task).collect(),
        };
        results.into_iter().collect()
    }
}
