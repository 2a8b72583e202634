//! Trial tracking and search outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::space::ParamSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Completed,
    Failed,
}

/// A single evaluated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub params: ParamSet,
    pub status: TrialStatus,
    /// Objective value (lower is better). `None` for failed trials.
    pub score: Option<f64>,
    pub error: Option<String>,
    pub duration_secs: f64,
    pub finished_at: DateTime<Utc>,
}

impl Trial {
    pub fn completed(number: usize, params: ParamSet, score: f64, duration_secs: f64) -> Self {
        Self {
            number,
            params,
            status: TrialStatus::Completed,
            score: Some(score),
            error: None,
            duration_secs,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(number: usize, params: ParamSet, error: String, duration_secs: f64) -> Self {
        Self {
            number,
            params,
            status: TrialStatus::Failed,
            score: None,
            error: Some(error),
            duration_secs,
            finished_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }

    /// Score of a completed trial with a finite objective.
    pub fn finite_score(&self) -> Option<f64> {
        self.score.filter(|s| s.is_finite() && self.is_completed())
    }
}

/// Lowest-scoring completed trial; the earliest wins ties.
pub fn best_trial(history: &[Trial]) -> Option<&Trial> {
    history
        .iter()
        .filter_map(|t| t.finite_score().map(|s| (s, t)))
        .fold(None, |best: Option<(f64, &Trial)>, (s, t)| match best {
            Some((b, _)) if b <= s => best,
            _ => Some((s, t)),
        })
        .map(|(_, t)| t)
}

/// Result of a finished search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub strategy: String,
    pub best: Trial,
    pub history: Vec<Trial>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SearchOutcome {
    pub fn best_params(&self) -> &ParamSet {
        &self.best.params
    }

    pub fn best_score(&self) -> f64 {
        self.best.score.unwrap_or(f64::NAN)
    }

    pub fn n_failed(&self) -> usize {
        self.history.iter().filter(|t| !t.is_completed()).count()
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
