use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort an analysis before any estimator runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid input: {0}")]
    /// The samples or the frequency parameters cannot be analyzed.
    InvalidInput(#[from] InputError),
    #[error("invalid tau range: {0}")]
    /// The requested averaging times violate the sampling limits.
    InvalidRange(#[from] RangeError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("central frequency must be nonzero")]
    ZeroCentralFrequency,
    #[error("central frequency must be finite")]
    NonFiniteCentralFrequency,
    #[error("sampling frequency must be positive and finite, got {0}")]
    InvalidSamplingFrequency(f64),
    #[error("frequency series is empty")]
    EmptySeries,
    #[error("sample {index} is not a finite number")]
    NonFiniteSample { index: usize },
    #[error("tau count must be at least one")]
    ZeroTauCount,
    #[error("no estimators enabled")]
    NoEstimators,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("tau_min {tau_min}s is below the sampling interval {tau0}s")]
    BelowResolution { tau_min: f64, tau0: f64 },
    #[error("tau_max {tau_max}s is above the ceiling of {ceiling}s (half the record)")]
    AboveCeiling { tau_max: f64, ceiling: f64 },
    #[error("tau_max {tau_max}s must be greater than tau_min {tau_min}s")]
    NotIncreasing { tau_min: f64, tau_max: f64 },
}
