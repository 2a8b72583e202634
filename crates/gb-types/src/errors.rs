use std::fmt;

use thiserror::Error;

/// Main error type for the GradBoost system
#[derive(Error, Debug)]
pub enum GbError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Failed to persist artifact {path}: {message}")]
    ArtifactPersistence { path: String, message: String },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: PipelineStage,
        #[source]
        source: Box<GbError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl GbError {
    /// Wrap this error with the pipeline stage it escaped from.
    ///
    /// Already-attributed errors and cancellations keep their original stage.
    pub fn in_stage(self, stage: PipelineStage) -> Self {
        match self {
            err @ (GbError::StageFailed { .. } | GbError::Cancelled { .. }) => err,
            other => GbError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Strip any stage attribution and return the underlying error.
    pub fn root(&self) -> &GbError {
        match self {
            GbError::StageFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Coarse stage of a regression run, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Split,
    Search,
    Training,
    Aggregation,
    Persistence,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Split => "split",
            PipelineStage::Search => "search",
            PipelineStage::Training => "training",
            PipelineStage::Aggregation => "aggregation",
            PipelineStage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// Data-related errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Target column not found: {column}")]
    MissingTargetColumn { column: String },

    #[error("Instance identifier not found in dataset: {id}")]
    MissingIdentifier { id: String },

    #[error("Duplicate instance identifier: {id}")]
    DuplicateIdentifier { id: String },

    #[error("Identifier {id} is present in only one of feature matrix and target")]
    UnalignedTarget { id: String },

    #[error("Feature not found: {name}")]
    MissingFeature { name: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data parsing error at {location}: {message}")]
    ParseError { location: String, message: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },
}

/// Model fitting and inference errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Feature count mismatch: model expects {expected}, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    #[error("Cannot fit on an empty training set")]
    EmptyTrainingSet,

    #[error("Invalid model parameters: {message}")]
    InvalidParams { message: String },

    #[error("Unsupported model artifact: {message}")]
    UnsupportedArtifact { message: String },
}

/// Hyperparameter search errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid bounds for hyperparameter {name}: {message}")]
    InvalidHyperparameterBounds { name: String, message: String },

    #[error("Empty search space")]
    EmptySpace,

    #[error("Objective evaluation failed on trial {trial}: {message}")]
    ObjectiveEvaluationFailure { trial: usize, message: String },

    #[error("All {trials} trials failed; no configuration to return")]
    AllTrialsFailed { trials: usize },

    #[error("Invalid value for hyperparameter {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Cross-validation and repeated-training errors
#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Fold {fold} failed: {message}")]
    FoldFailure { fold: usize, message: String },

    #[error("Repetition {repetition} failed: {message}")]
    RepetitionFailure { repetition: usize, message: String },

    #[error("Invalid fold count {folds} for {samples} samples")]
    InvalidFoldCount { folds: usize, samples: usize },

    #[error("No repetition completed successfully ({failed} failed)")]
    NoSuccessfulRepetitions { failed: usize },
}

/// Result type alias for GradBoost operations
pub type GbResult<T> = Result<T, GbError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::GbError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::GbError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::GbError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = DataError::MissingIdentifier {
            id: "line_42".to_string(),
        };
        assert!(error.to_string().contains("line_42"));

        let error = TrainingError::RepetitionFailure {
            repetition: 3,
            message: "fit failed".to_string(),
        };
        assert!(error.to_string().contains("Repetition 3"));
    }

    #[test]
    fn test_error_conversion() {
        let data_error = DataError::MissingTargetColumn {
            column: "height".to_string(),
        };
        let gb_error: GbError = data_error.into();

        match gb_error {
            GbError::Data(DataError::MissingTargetColumn { column }) => assert_eq!(column, "height"),
            _ => panic!("Expected Data error"),
        }
    }

    #[test]
    fn test_stage_attribution() {
        let err: GbError = SearchError::AllTrialsFailed { trials: 5 }.into();
        let staged = err.in_stage(PipelineStage::Search);
        assert!(staged.to_string().starts_with("search stage failed"));
        assert!(matches!(
            staged.root(),
            GbError::Search(SearchError::AllTrialsFailed { trials: 5 })
        ));

        // Re-wrapping keeps the innermost stage.
        let rewrapped = staged.in_stage(PipelineStage::Training);
        assert!(matches!(
            rewrapped,
            GbError::StageFailed {
                stage: PipelineStage::Search,
                ..
            }
        ));
    }

    #[test]
    fn test_cancellation_is_not_wrapped() {
        let err = GbError::Cancelled {
            stage: PipelineStage::Training,
        };
        assert!(matches!(
            err.in_stage(PipelineStage::Search),
            GbError::Cancelled {
                stage: PipelineStage::Training
            }
        ));
    }

    #[test]
    fn test_macros() {
        let _validation_err = validation_error!("Invalid value: {}", 42);
        let _internal_err = internal_error!("Something went wrong");
        let _config_err = config_error!("Missing required field: {}", "folds");
    }
}
