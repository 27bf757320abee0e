use thiserror::Error;

use crate::optimizer::stop_condition::StopCondition;

/// Errors raised by the cached transform and its sparse basis cache.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TransformError
{
    #[error("cannot switch interpolation mode from {current} to {requested}")]
    ModeConflict { current: &'static str, requested: &'static str },
    #[error("no reference domain has been set")]
    MissingDomain,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid control grid size: {0}")]
    InvalidGridSize(String),
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("serialization failed")]
    SerializationFailed,
    #[error("deserialization failed")]
    DeserializationFailed,
    #[error("LZ4 decompression failed")]
    LZ4DecompressionFailed,
    #[error("invalid kernel: {0}")]
    InvalidKernel(String),
    #[error("coefficient fit failed: {0}")]
    FitFailed(String),
}

/// Errors reported by an energy functional.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FunctionalError
{
    #[error("functional evaluation failed: {0}")]
    Evaluation(String),
    #[error("parameter update failed: {0}")]
    ParameterUpdate(String),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum ConvergenceError
{
    #[error("at least two energy samples are required, {available} available")]
    InsufficientSamples { available: usize },
    #[error("energy window contains non-finite values")]
    NonFinite,
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum OptimizerError
{
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("energy evaluation failed: {0}")]
    Functional(FunctionalError),
    #[error("parameter update failed: {0}")]
    ParameterUpdate(FunctionalError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("optimizer already terminated ({0:?}); call start() again")]
    Terminated(StopCondition),
    #[error("could not build worker pool: {0}")]
    ThreadPool(String),
}

impl OptimizerError
{
    pub fn invalid_configuration(msg: impl Into<String>) -> Self
    {
        Self::InvalidConfiguration(msg.into())
    }
}

#[test]
fn check_error_display()
{
    let err = TransformError::ModeConflict { current: "grid", requested: "points" };
    assert_eq!(err.to_string(), "cannot switch interpolation mode from grid to points");
    let err: FunctionalError = TransformError::MissingDomain.into();
    assert_eq!(err.to_string(), "no reference domain has been set");
    let err = OptimizerError::invalid_configuration("numberOfIterations must be positive");
    assert!(err.to_string().contains("numberOfIterations"));
}
