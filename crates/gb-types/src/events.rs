//! Progress events emitted while a run executes.

use serde::{Deserialize, Serialize};

/// A progress notification. Sent over a channel; a missing or disconnected
/// receiver never affects the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    SearchStarted {
        strategy: String,
        budget: usize,
    },
    TrialCompleted {
        number: usize,
        score: f64,
        best_score: f64,
    },
    TrialFailed {
        number: usize,
        message: String,
    },
    SearchFinished {
        best_score: f64,
        trials: usize,
        failed: usize,
    },
    RepetitionCompleted {
        repetition: usize,
        val_r2: f64,
        test_r2: f64,
    },
    RepetitionFailed {
        repetition: usize,
        message: String,
    },
}
