//! Tree-structured Parzen estimator.
//!
//! After a random warm-up, completed trials are split at the γ-quantile of
//! their scores into a "good" and a "bad" set. Each dimension is then sampled
//! independently so as to maximise l(x)/g(x), the ratio of the densities
//! estimated from the good and the bad set.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use gb_types::{GbResult, SearchConfig};

use crate::search::SearchStrategy;
use crate::space::{Dimension, ParamSet, ParameterValue, SearchSpace};
use crate::trial::Trial;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpeConfig {
    /// Random proposals before the history is modelled.
    pub startup_trials: usize,
    /// Fraction of completed trials treated as good.
    pub gamma: f64,
    /// Candidates drawn from l(x) per continuous dimension.
    pub ei_candidates: usize,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            startup_trials: 20,
            gamma: 0.25,
            ei_candidates: 24,
        }
    }
}

impl From<&SearchConfig> for TpeConfig {
    fn from(config: &SearchConfig) -> Self {
        Self {
            startup_trials: config.startup_trials,
            gamma: config.gamma,
            ei_candidates: config.ei_candidates,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TpeSearch {
    space: SearchSpace,
    config: TpeConfig,
    rng: ChaCha8Rng,
}

impl TpeSearch {
    pub fn new(space: SearchSpace, config: TpeConfig, seed: u64) -> GbResult<Self> {
        space.validate()?;
        Ok(Self {
            space,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    fn sample_dimension(
        &mut self,
        name: &str,
        dimension: &Dimension,
        good: &[&Trial],
        bad: &[&Trial],
    ) -> ParameterValue {
        match dimension {
            Dimension::Fixed { value } => value.clone(),
            Dimension::Uniform { low, high } => {
                let good_values = float_values(name, good);
                let bad_values = float_values(name, bad);
                ParameterValue::Float(sample_continuous(
                    &mut self.rng,
                    &good_values,
                    &bad_values,
                    *low,
                    *high,
                    self.config.ei_candidates,
                ))
            }
            Dimension::QuantizedInt { low, step, .. } => {
                let grid = dimension.quantized_values();
                let last = grid.len() - 1;
                let slot = |t: &&Trial| {
                    let v = t.params.get(name)?.as_f64()?;
                    let k = ((v - *low as f64) / *step as f64).round();
                    Some(k.clamp(0.0, last as f64) as usize)
                };
                let good_counts = counts(good.iter().filter_map(slot), grid.len());
                let bad_counts = counts(bad.iter().filter_map(slot), grid.len());
                let idx = sample_ratio(&mut self.rng, &good_counts, &bad_counts);
                ParameterValue::Int(grid[idx])
            }
            Dimension::Choice { values } => {
                let slot = |t: &&Trial| {
                    let s = t.params.get(name)?.as_str()?;
                    values.iter().position(|c| c == s)
                };
                let good_counts = counts(good.iter().filter_map(slot), values.len());
                let bad_counts = counts(bad.iter().filter_map(slot), values.len());
                let idx = sample_ratio(&mut self.rng, &good_counts, &bad_counts);
                ParameterValue::Text(values[idx].clone())
            }
        }
    }
}

impl SearchStrategy for TpeSearch {
    fn propose(&mut self, history: &[Trial]) -> GbResult<ParamSet> {
        let mut completed: Vec<&Trial> = history
            .iter()
            .filter(|t| t.finite_score().is_some())
            .collect();

        if completed.len() < self.config.startup_trials.max(2) {
            return Ok(self.space.sample_random(&mut self.rng));
        }

        // Stable sort: equal scores keep trial order.
        completed.sort_by(|a, b| {
            let sa = a.score.unwrap_or(f64::INFINITY);
            sa.total_cmp(&b.score.unwrap_or(f64::INFINITY))
        });
        let n = completed.len();
        let n_good = ((n as f64 * self.config.gamma).ceil() as usize).clamp(1, n - 1);
        let (good, bad) = completed.split_at(n_good);
        debug!(n_good, n_bad = bad.len(), "tpe split");

        let space = self.space.clone();
        let mut params = ParamSet::new();
        for param in space.iter() {
            let value = self.sample_dimension(&param.name, &param.dimension, good, bad);
            params.insert(param.name.clone(), value);
        }
        Ok(params)
    }

    fn name(&self) -> &str {
        "tpe"
    }
}

fn float_values(name: &str, trials: &[&Trial]) -> Vec<f64> {
    trials
        .iter()
        .filter_map(|t| t.params.get(name)?.as_f64())
        .filter(|v| v.is_finite())
        .collect()
}

fn counts(slots: impl Iterator<Item = usize>, len: usize) -> Vec<f64> {
    let mut out = vec![0.0; len];
    for s in slots {
        out[s] += 1.0;
    }
    out
}

/// Draw an index with probability proportional to the Laplace-smoothed
/// ratio of good to bad frequencies.
fn sample_ratio<R: Rng + ?Sized>(rng: &mut R, good: &[f64], bad: &[f64]) -> usize {
    let m = good.len() as f64;
    let n_good: f64 = good.iter().sum();
    let n_bad: f64 = bad.iter().sum();
    let weights: Vec<f64> = good
        .iter()
        .zip(bad)
        .map(|(g, b)| ((g + 1.0) / (n_good + m)) / ((b + 1.0) / (n_bad + m)))
        .collect();
    let total: f64 = weights.iter().sum();

    let r: f64 = rng.random::<f64>() * total;
    let mut cumsum = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumsum += w;
        if r < cumsum {
            return i;
        }
    }
    weights.len() - 1
}

/// Draw `n_candidates` points from the good-set mixture and keep the one with
/// the highest l(x)/g(x).
fn sample_continuous<R: Rng + ?Sized>(
    rng: &mut R,
    good: &[f64],
    bad: &[f64],
    low: f64,
    high: f64,
    n_candidates: usize,
) -> f64 {
    let width = high - low;
    if width <= 0.0 {
        return low;
    }
    let bandwidth = width / 10.0;

    let mut best_value = low + rng.random::<f64>() * width;
    let mut best_ratio = f64::NEG_INFINITY;
    for _ in 0..n_candidates.max(1) {
        // Component `good.len()` is the uniform prior.
        let k = rng.random_range(0..=good.len());
        let candidate = if k == good.len() {
            low + rng.random::<f64>() * width
        } else {
            (good[k] + gaussian(rng) * bandwidth).clamp(low, high)
        };

        let l = parzen_density(candidate, good, bandwidth, width);
        let g = parzen_density(candidate, bad, bandwidth, width);
        let ratio = l / g;
        if ratio > best_ratio {
            best_ratio = ratio;
            best_value = candidate;
        }
    }
    best_value
}

/// Density of an equal-weight mixture of Gaussian kernels and the uniform
/// prior over the dimension.
fn parzen_density(x: f64, values: &[f64], bandwidth: f64, width: f64) -> f64 {
    let norm = 1.0 / (bandwidth * (2.0 * std::f64::consts::PI).sqrt());
    let kernels: f64 = values
        .iter()
        .map(|&v| norm * (-(x - v).powi(2) / (2.0 * bandwidth * bandwidth)).exp())
        .sum();
    (kernels + 1.0 / width) / (values.len() as f64 + 1.0)
}

/// Standard normal draw (Box-Muller).
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-12);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
