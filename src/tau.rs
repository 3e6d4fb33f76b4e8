use crate::error::{InputError, RangeError, Result};
use serde::{Deserialize, Serialize};

use std::ops::Deref;

// relative slack when comparing a requested tau to a sampling bound, so a
// bound written in decimal (0.1 for 10Hz) is not rejected by rounding
const BOUND_TOLERANCE: f64 = 1e-9;

/// An averaging time and the integer number of samples it spans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TauPoint {
    /// Averaging time in seconds, `m * tau0`.
    pub tau: f64,
    /// Averaging factor.
    pub m: usize,
}

impl TauPoint {
    pub fn new(m: usize, fs: f64) -> Self {
        Self {
            tau: m as f64 / fs,
            m,
        }
    }
}

/// Averaging times, strictly increasing, with no two sharing a factor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TauSet {
    points: Vec<TauPoint>,
}

impl TauSet {
    /// Builds a set from arbitrary factors. Zero and duplicate factors are
    /// dropped and the remainder sorted.
    pub fn from_factors(factors: impl IntoIterator<Item = usize>, fs: f64) -> Self {
        let mut factors: Vec<usize> = factors.into_iter().filter(|m| *m > 0).collect();
        factors.sort_unstable();
        factors.dedup();

        Self {
            points: factors.into_iter().map(|m| TauPoint::new(m, fs)).collect(),
        }
    }
}

impl Deref for TauSet {
    type Target = [TauPoint];

    fn deref(&self) -> &[TauPoint] {
        &self.points
    }
}

/// Placement of candidate averaging times between the bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    #[default]
    Linear,
    #[serde(alias = "log")]
    Logarithmic,
}

impl Spacing {
    fn candidates(&self, tau_min: f64, tau_max: f64, count: usize) -> Vec<f64> {
        if count == 1 {
            return vec![tau_min];
        }

        let steps = (count - 1) as f64;

        match self {
            Self::Linear => {
                let step = (tau_max - tau_min) / steps;
                (0..count).map(|i| tau_min + step * i as f64).collect()
            }
            Self::Logarithmic => {
                let ratio = (tau_max / tau_min).ln() / steps;
                (0..count)
                    .map(|i| tau_min * (ratio * i as f64).exp())
                    .collect()
            }
        }
    }
}

/// Plans a linearly spaced sweep of averaging times. See [`plan_taus_spaced`].
pub fn plan_taus(tau_min: f64, tau_max: f64, count: usize, fs: f64, n: usize) -> Result<TauSet> {
    plan_taus_spaced(Spacing::Linear, tau_min, tau_max, count, fs, n)
}

/// Validates the requested range against a record of `n` samples taken at
/// `fs` and maps `count` candidate taus onto unique averaging factors.
///
/// The range must start at or above one sample interval and end at or below
/// half the record length. Candidates that round to the same factor collapse
/// into one point, so the returned set may be shorter than `count`.
pub fn plan_taus_spaced(
    spacing: Spacing,
    tau_min: f64,
    tau_max: f64,
    count: usize,
    fs: f64,
    n: usize,
) -> Result<TauSet> {
    if !(fs.is_finite() && fs > 0.0) {
        return Err(InputError::InvalidSamplingFrequency(fs).into());
    }

    if n == 0 {
        return Err(InputError::EmptySeries.into());
    }

    if count == 0 {
        return Err(InputError::ZeroTauCount.into());
    }

    let tau0 = 1.0 / fs;

    if tau_min.is_nan() || tau_min < tau0 * (1.0 - BOUND_TOLERANCE) {
        return Err(RangeError::BelowResolution { tau_min, tau0 }.into());
    }

    let ceiling = n as f64 / 2.0 * tau0;

    if tau_max.is_nan() || tau_max > ceiling * (1.0 + BOUND_TOLERANCE) {
        return Err(RangeError::AboveCeiling { tau_max, ceiling }.into());
    }

    if tau_max <= tau_min {
        return Err(RangeError::NotIncreasing { tau_min, tau_max }.into());
    }

    let factors = spacing
        .candidates(tau_min, tau_max, count)
        .into_iter()
        .map(|tau| (tau * fs).round())
        .filter(|m| *m >= 1.0)
        .map(|m| m as usize);

    Ok(TauSet::from_factors(factors, fs))
}
