//! Loss functions: initial estimate, negative gradient and the per-leaf
//! line search.

use crate::params::LossKind;

/// Negative gradient of the loss at the current raw predictions.
#[derive(Debug, Clone)]
pub(crate) struct Pseudoresiduals {
    pub values: Vec<f64>,
    /// Huber transition point for this stage; unused by the other losses.
    pub delta: f64,
}

impl LossKind {
    /// Optimal constant prediction for `y`.
    pub(crate) fn init_estimate(&self, y: &[f64]) -> f64 {
        match *self {
            LossKind::SquaredError => y.iter().sum::<f64>() / y.len() as f64,
            LossKind::AbsoluteError | LossKind::Huber { .. } => percentile(y, 50.0),
            LossKind::Quantile { alpha } => percentile(y, alpha * 100.0),
        }
    }

    /// Mean loss of `raw` against `y`.
    pub(crate) fn loss(&self, y: &[f64], raw: &[f64]) -> f64 {
        let n = y.len() as f64;
        match *self {
            LossKind::SquaredError => {
                y.iter().zip(raw).map(|(t, p)| (t - p) * (t - p)).sum::<f64>() / n
            }
            LossKind::AbsoluteError => y.iter().zip(raw).map(|(t, p)| (t - p).abs()).sum::<f64>() / n,
            LossKind::Huber { alpha } => {
                let diff: Vec<f64> = y.iter().zip(raw).map(|(t, p)| t - p).collect();
                let abs: Vec<f64> = diff.iter().map(|d| d.abs()).collect();
                let delta = percentile(&abs, alpha * 100.0);
                abs.iter()
                    .map(|&a| {
                        if a <= delta {
                            0.5 * a * a
                        } else {
                            delta * (a - 0.5 * delta)
                        }
                    })
                    .sum::<f64>()
                    / n
            }
            LossKind::Quantile { alpha } => {
                y.iter()
                    .zip(raw)
                    .map(|(t, p)| {
                        let d = t - p;
                        if d > 0.0 {
                            alpha * d
                        } else {
                            (alpha - 1.0) * d
                        }
                    })
                    .sum::<f64>()
                    / n
            }
        }
    }

    pub(crate) fn negative_gradient(&self, y: &[f64], raw: &[f64]) -> Pseudoresiduals {
        let diff = y.iter().zip(raw).map(|(t, p)| t - p);
        match *self {
            LossKind::SquaredError => Pseudoresiduals {
                values: diff.collect(),
                delta: 0.0,
            },
            LossKind::AbsoluteError => Pseudoresiduals {
                values: diff.map(|d| if d > 0.0 { 1.0 } else { -1.0 }).collect(),
                delta: 0.0,
            },
            LossKind::Huber { alpha } => {
                let diff: Vec<f64> = diff.collect();
                let abs: Vec<f64> = diff.iter().map(|d| d.abs()).collect();
                let delta = percentile(&abs, alpha * 100.0);
                let values = diff
                    .iter()
                    .map(|&d| if d.abs() <= delta { d } else { delta * d.signum() })
                    .collect();
                Pseudoresiduals { values, delta }
            }
            LossKind::Quantile { alpha } => Pseudoresiduals {
                values: diff
                    .map(|d| if d > 0.0 { alpha } else { alpha - 1.0 })
                    .collect(),
                delta: 0.0,
            },
        }
    }

    /// Line-search value of a leaf given the residuals `y - raw` of its
    /// in-bag samples.
    pub(crate) fn leaf_value(&self, residuals: &[f64], delta: f64) -> f64 {
        if residuals.is_empty() {
            return 0.0;
        }
        match *self {
            LossKind::SquaredError => residuals.iter().sum::<f64>() / residuals.len() as f64,
            LossKind::AbsoluteError => lower_percentile(residuals, 50.0),
            LossKind::Quantile { alpha } => lower_percentile(residuals, alpha * 100.0),
            LossKind::Huber { .. } => {
                let median = lower_percentile(residuals, 50.0);
                let clipped = residuals
                    .iter()
                    .map(|&r| {
                        let dev = r - median;
                        dev.signum() * dev.abs().min(delta)
                    })
                    .sum::<f64>()
                    / residuals.len() as f64;
                median + clipped
            }
        }
    }
}

/// Percentile with linear interpolation between order statistics.
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Unit-weight percentile that picks the first order statistic whose
/// cumulative weight reaches `q`% of the total.
pub(crate) fn lower_percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let target = q / 100.0 * sorted.len() as f64;
    let idx = (1..=sorted.len())
        .position(|cum| cum as f64 >= target)
        .unwrap_or(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.5);
        assert_eq!(percentile(&[5.0, 1.0, 3.0], 50.0), 3.0);
        assert!((percentile(&[0.0, 10.0], 90.0) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn lower_percentile_picks_order_statistic() {
        assert_eq!(lower_percentile(&[4.0, 1.0, 3.0, 2.0], 50.0), 2.0);
        assert_eq!(lower_percentile(&[7.0], 50.0), 7.0);
        assert_eq!(lower_percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 90.0), 5.0);
    }

    #[test]
    fn init_estimates() {
        let y = [1.0, 2.0, 3.0, 10.0];
        assert_eq!(LossKind::SquaredError.init_estimate(&y), 4.0);
        assert_eq!(LossKind::AbsoluteError.init_estimate(&y), 2.5);
    }

    #[test]
    fn absolute_gradient_is_sign() {
        let g = LossKind::AbsoluteError.negative_gradient(&[1.0, 0.0, 2.0], &[0.0, 0.0, 3.0]);
        assert_eq!(g.values, vec![1.0, -1.0, -1.0]);
    }

    #[test]
    fn huber_clips_large_residuals() {
        let y = [0.0, 0.0, 0.0, 0.0, 100.0];
        let raw = [0.0; 5];
        let loss = LossKind::Huber { alpha: 0.5 };
        let g = loss.negative_gradient(&y, &raw);
        assert_eq!(g.delta, 0.0);
        assert_eq!(g.values[4], 0.0);

        let loss = LossKind::Huber { alpha: 0.9 };
        let g = loss.negative_gradient(&[1.0, -2.0, 3.0, -4.0, 50.0], &raw);
        assert!(g.values[4] < 50.0 && g.values[4] > 0.0);
    }

    #[test]
    fn quantile_leaf_uses_alpha() {
        let loss = LossKind::Quantile { alpha: 0.8 };
        let residuals = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(loss.leaf_value(&residuals, 0.0), 4.0);
    }

    #[test]
    fn squared_loss_is_mse() {
        let loss = LossKind::SquaredError.loss(&[1.0, 2.0], &[0.0, 4.0]);
        assert_eq!(loss, 2.5);
    }
}
