//! Error types for the estimator core

use thiserror::Error;

use crate::my_types::FeatureId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown feature id {0}")]
    UnknownFeatureId(FeatureId),

    #[error("feature id {0} is already tracked")]
    DuplicateFeatureId(FeatureId),

    #[error("non-finite value in {0}")]
    NonFiniteState(String),

    #[error("feature capacity of {0} reached")]
    CapacityExceeded(usize),

    #[error("invalid landmark depth {0}")]
    InvalidDepth(f64),

    #[error("feature {0} is not in front of the camera")]
    FeatureOutOfView(FeatureId),

    #[error("innovation covariance is singular for {0}")]
    SingularInnovation(String),

    #[error("{0} needs an IMU sample before it can be predicted")]
    MissingInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EstimatorError {
    pub(crate) fn dimension(context: &'static str, expected: usize, actual: usize) -> Self {
        EstimatorError::DimensionMismatch {
            context,
            expected,
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, EstimatorError>;
