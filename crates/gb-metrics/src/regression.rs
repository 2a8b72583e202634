//! Regression metrics for one set of predictions.

use serde::{Deserialize, Serialize};

use gb_types::{validation_error, GbResult};

/// The five metrics reported for every validation and test evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mse: f64,
    pub rmse: f64,
    /// Explained variance score.
    pub evs: f64,
    pub r2: f64,
    /// Pearson correlation between actual and predicted. NaN when either
    /// series is constant.
    pub pcc: f64,
}

impl RegressionMetrics {
    /// Metric names in report order.
    pub const NAMES: [&'static str; 5] = ["MSE", "RMSE", "EVS", "R2", "PCC"];

    pub fn compute(actual: &[f64], predicted: &[f64]) -> GbResult<Self> {
        if actual.len() != predicted.len() {
            return Err(validation_error!(
                "{} actual values but {} predictions",
                actual.len(),
                predicted.len()
            ));
        }
        if actual.is_empty() {
            return Err(validation_error!("cannot score an empty prediction set"));
        }

        let n = actual.len() as f64;
        let mean_y = actual.iter().sum::<f64>() / n;
        let mean_p = predicted.iter().sum::<f64>() / n;

        let residuals: Vec<f64> = actual.iter().zip(predicted).map(|(y, p)| y - p).collect();
        let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
        let ss_tot: f64 = actual.iter().map(|y| (y - mean_y).powi(2)).sum();

        let mse = ss_res / n;
        let mean_r = residuals.iter().sum::<f64>() / n;
        let var_r = residuals.iter().map(|r| (r - mean_r).powi(2)).sum::<f64>() / n;
        let var_y = ss_tot / n;

        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            evs: score_ratio(var_r, var_y),
            r2: score_ratio(ss_res, ss_tot),
            pcc: pearson(actual, predicted, mean_y, mean_p),
        })
    }

    /// Values in [`NAMES`](Self::NAMES) order.
    pub fn values(&self) -> [f64; 5] {
        [self.mse, self.rmse, self.evs, self.r2, self.pcc]
    }
}

/// `1 - num / den`, with a constant target scoring 1.0 for a perfect fit and
/// 0.0 otherwise.
fn score_ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        if num == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - num / den
    }
}

fn pearson(a: &[f64], b: &[f64], mean_a: f64, mean_b: f64) -> f64 {
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn perfect_prediction() {
        let y = [1.0, 2.0, 3.0, 4.0];
        let m = RegressionMetrics::compute(&y, &y).unwrap();
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.evs, 1.0);
        assert!(close(m.pcc, 1.0));
    }

    #[test]
    fn known_values() {
        let y = [3.0, -0.5, 2.0, 7.0];
        let p = [2.5, 0.0, 2.0, 8.0];
        let m = RegressionMetrics::compute(&y, &p).unwrap();
        assert!(close(m.mse, 0.375));
        assert!(close(m.rmse, 0.375f64.sqrt()));
        assert!(close(m.r2, 0.948_608_137_044_967_9));
        assert!(close(m.evs, 0.957_173_447_537_473_2));
    }

    #[test]
    fn constant_offset_hurts_r2_but_not_evs_or_pcc() {
        let y = [1.0, 2.0, 3.0];
        let p = [2.0, 3.0, 4.0];
        let m = RegressionMetrics::compute(&y, &p).unwrap();
        assert_eq!(m.evs, 1.0);
        assert!(close(m.pcc, 1.0));
        assert!(close(m.r2, -0.5));
    }

    #[test]
    fn constant_actual_follows_finite_convention() {
        let y = [5.0, 5.0, 5.0];
        let exact = RegressionMetrics::compute(&y, &y).unwrap();
        assert_eq!(exact.r2, 1.0);
        assert!(exact.pcc.is_nan());

        let off = RegressionMetrics::compute(&y, &[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(off.r2, 0.0);
        assert_eq!(off.evs, 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(RegressionMetrics::compute(&[1.0], &[1.0, 2.0]).is_err());
        assert!(RegressionMetrics::compute(&[], &[]).is_err());
    }
}
