//! Frequency stability analysis for oscillator measurements.
//!
//! Raw frequency samples are converted to fractional frequency and phase,
//! a sweep of averaging times is planned, and every point of the sweep is
//! characterized with Allan and Hadamard deviations, a power-law noise
//! classification and chi-squared confidence bounds. The [`sweep`] module
//! ties the stages together behind a cancellable, progress-reporting
//! controller.

pub mod confidence;
pub mod config;
pub mod deviation;
pub mod error;
pub mod noise;
pub mod series;
pub mod sweep;
pub mod tau;

pub use confidence::{confidence_interval, ConfidenceInterval};
pub use config::{Config, ConfigError};
pub use deviation::{estimate, EstimatorKind};
pub use error::{Error, InputError, RangeError, Result};
pub use noise::{classify_noise, NoiseEstimate, NoiseLabel, NoiseMethod};
pub use series::{convert_series, CentralFrequency, FractionalFrequency, Phase};
pub use sweep::{
    run_sweep, CancelFn, CancelSignal, Never, NoProgress, ProgressSink, SweepConfig,
    SweepController, SweepOutcome, SweepReport, SweepState,
};
pub use tau::{plan_taus, Spacing, TauPoint, TauSet};
