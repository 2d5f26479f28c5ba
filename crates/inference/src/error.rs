use crate::resolver::LoadAttemptLog;
use thiserror::Error;

/// Request-boundary failures of the inference service.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("All backends failed to load: {0}")]
    BackendLoadFailed(LoadAttemptLog),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

/// Why a raw detection was dropped by the normalizer.
///
/// These never reach the caller as request errors; they are logged and counted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedDetection {
    #[error("class id {0} has no entry in the class-name table")]
    UnknownClass(usize),

    #[error("class id {0} is not a non-negative integer")]
    InvalidClassId(f32),

    #[error("confidence {0} is not a finite value in [0, 1]")]
    InvalidConfidence(f32),

    #[error("box {0:?} has non-finite coordinates")]
    NonFiniteBox([f32; 4]),

    #[error("box {0:?} is degenerate")]
    DegenerateBox([f32; 4]),

    #[error("hub row has {0} columns, expected 6")]
    ShortRow(usize),
}
