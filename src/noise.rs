//! Power-law noise identification.
//!
//! Oscillator noise is modelled as a sum of power-law processes with
//! fractional-frequency spectral density `S_y(f) ~ f^alpha`. The five
//! canonical processes have integer exponents from `+2` (white phase) down
//! to `-2` (random walk frequency). Identification estimates `alpha` at one
//! averaging factor and snaps it to the nearest canonical exponent.

use crate::error::{InputError, Result};
use crate::series::FractionalFrequency;
use crate::tau::TauSet;
use serde::{Deserialize, Serialize};

/// Dominant noise process at an averaging time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoiseLabel {
    #[serde(rename = "WhitePM")]
    WhitePm,
    #[serde(rename = "FlickerPM")]
    FlickerPm,
    #[serde(rename = "WhiteFM")]
    WhiteFm,
    #[serde(rename = "FlickerFM")]
    FlickerFm,
    #[serde(rename = "RandomWalkFM")]
    RandomWalkFm,
    Unclassified,
}

impl NoiseLabel {
    /// The power-law exponent of the process, `None` when unclassified.
    pub fn alpha(&self) -> Option<i32> {
        match self {
            Self::WhitePm => Some(2),
            Self::FlickerPm => Some(1),
            Self::WhiteFm => Some(0),
            Self::FlickerFm => Some(-1),
            Self::RandomWalkFm => Some(-2),
            Self::Unclassified => None,
        }
    }

    pub fn is_classified(&self) -> bool {
        !matches!(self, Self::Unclassified)
    }
}

/// Maps a canonical exponent to its noise process.
pub fn dominant_noise(alpha: i32) -> NoiseLabel {
    match alpha {
        2 => NoiseLabel::WhitePm,
        1 => NoiseLabel::FlickerPm,
        0 => NoiseLabel::WhiteFm,
        -1 => NoiseLabel::FlickerFm,
        -2 => NoiseLabel::RandomWalkFm,
        _ => NoiseLabel::Unclassified,
    }
}

/// Snaps a continuous exponent estimate to the nearest canonical exponent.
pub fn resolve(alpha: f64) -> NoiseLabel {
    if !alpha.is_finite() {
        return NoiseLabel::Unclassified;
    }

    let nearest = alpha.round().clamp(-2.0, 2.0);

    if (alpha - nearest).abs() > 0.5 {
        return NoiseLabel::Unclassified;
    }

    dominant_noise(nearest as i32)
}

/// Continuous exponent estimate and the label it resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseEstimate {
    /// `NaN` when no estimate could be formed.
    pub alpha: f64,
    pub label: NoiseLabel,
}

impl NoiseEstimate {
    pub fn undetermined() -> Self {
        Self {
            alpha: f64::NAN,
            label: NoiseLabel::Unclassified,
        }
    }

    fn from_alpha(alpha: Option<f64>) -> Self {
        match alpha {
            Some(alpha) => Self {
                alpha,
                label: resolve(alpha),
            },
            None => Self::undetermined(),
        }
    }
}

/// A strategy for estimating the power-law exponent at one averaging factor.
pub trait NoiseIdentifier: Sync {
    /// Returns `None` when the record is too short at this factor.
    fn exponent(&self, y: &[f64], m: usize) -> Option<f64>;

    fn identify(&self, y: &[f64], m: usize) -> NoiseEstimate {
        NoiseEstimate::from_alpha(self.exponent(y, m))
    }
}

/// Lag-1 autocorrelation identification.
///
/// The series is averaged over blocks of `m` samples and the lag-1
/// autocorrelation `r1` taken. For a power-law process `delta = r1 / (1 + r1)`
/// approaches `-alpha / 2` as long as the process is stationary; a random walk
/// is made stationary by differencing first, each difference lowering the
/// exponent by two.
#[derive(Debug, Clone, Copy)]
pub struct Lag1Autocorrelation {
    /// Fewest averaged points an estimate is formed from.
    pub min_points: usize,
    /// Most differencing passes applied.
    pub max_differences: usize,
}

impl Default for Lag1Autocorrelation {
    fn default() -> Self {
        Self {
            min_points: 32,
            max_differences: 2,
        }
    }
}

impl NoiseIdentifier for Lag1Autocorrelation {
    fn exponent(&self, y: &[f64], m: usize) -> Option<f64> {
        if m == 0 {
            return None;
        }

        let mut series = block_average(y, m);

        if series.len() < self.min_points {
            return None;
        }

        let mut d = 0;

        loop {
            let r1 = lag1_autocorrelation(&series)?;
            let delta = r1 / (1.0 + r1);

            if delta < 0.25 || d >= self.max_differences {
                return Some(-2.0 * (delta + d as f64));
            }

            series = series.windows(2).map(|w| w[1] - w[0]).collect();
            d += 1;
        }
    }
}

/// Variance-ratio identification.
///
/// Modified Allan variance scales as `tau^mu` with `mu = -alpha - 1` across
/// all five processes, so the growth between `m` and `2m` gives the exponent
/// directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceRatio;

impl NoiseIdentifier for VarianceRatio {
    fn exponent(&self, y: &[f64], m: usize) -> Option<f64> {
        if m == 0 || m.checked_mul(6).is_none_or(|w| w > y.len()) {
            return None;
        }

        let x = integrate(y);
        let near = modified_allan_variance(&x, m)?;
        let far = modified_allan_variance(&x, 2 * m)?;

        if near <= 0.0 || far <= 0.0 {
            return None;
        }

        let mu = (far / near).log2();

        Some(-mu - 1.0)
    }
}

/// Selects a [`NoiseIdentifier`] by name, for use from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoiseMethod {
    #[default]
    #[serde(alias = "lag1")]
    Lag1Autocorrelation,
    #[serde(alias = "ratio")]
    VarianceRatio,
}

impl NoiseMethod {
    pub fn identifier(&self) -> Box<dyn NoiseIdentifier> {
        match self {
            Self::Lag1Autocorrelation => Box::new(Lag1Autocorrelation::default()),
            Self::VarianceRatio => Box::new(VarianceRatio),
        }
    }
}

/// Labels the dominant noise at every point of the sweep using lag-1
/// autocorrelation. `fs` must be the sampling frequency the tau set was
/// planned with.
pub fn classify_noise(
    y: &FractionalFrequency,
    taus: &TauSet,
    fs: f64,
) -> Result<Vec<NoiseLabel>> {
    if !(fs.is_finite() && fs > 0.0) {
        return Err(InputError::InvalidSamplingFrequency(fs).into());
    }

    let tau0 = 1.0 / fs;

    if taus
        .iter()
        .any(|p| (p.tau - p.m as f64 * tau0).abs() > 1e-9 * p.tau.abs().max(tau0))
    {
        return Err(InputError::InvalidSamplingFrequency(fs).into());
    }

    Ok(classify_noise_with(&Lag1Autocorrelation::default(), y, taus)
        .into_iter()
        .map(|estimate| estimate.label)
        .collect())
}

pub fn classify_noise_with(
    identifier: &dyn NoiseIdentifier,
    y: &FractionalFrequency,
    taus: &TauSet,
) -> Vec<NoiseEstimate> {
    taus.iter().map(|p| identifier.identify(y, p.m)).collect()
}

fn block_average(y: &[f64], m: usize) -> Vec<f64> {
    y.chunks_exact(m)
        .map(|block| block.iter().sum::<f64>() / m as f64)
        .collect()
}

fn lag1_autocorrelation(z: &[f64]) -> Option<f64> {
    if z.len() < 3 {
        return None;
    }

    let mean = z.iter().sum::<f64>() / z.len() as f64;
    let variance: f64 = z.iter().map(|v| (v - mean).powi(2)).sum();

    if variance <= 0.0 || !variance.is_finite() {
        return None;
    }

    let covariance: f64 = z
        .windows(2)
        .map(|w| (w[0] - mean) * (w[1] - mean))
        .sum();

    Some(covariance / variance)
}

// phase in units of the sampling interval
fn integrate(y: &[f64]) -> Vec<f64> {
    let mut x = Vec::with_capacity(y.len() + 1);
    let mut acc = 0.0;
    x.push(acc);
    for v in y {
        acc += v;
        x.push(acc);
    }
    x
}

// modified Allan variance at factor `m` with unit sampling interval
fn modified_allan_variance(x: &[f64], m: usize) -> Option<f64> {
    if m == 0 || m.checked_mul(3).is_none_or(|w| x.len() <= w) {
        return None;
    }

    let mut prefix = Vec::with_capacity(x.len() + 1);
    let mut acc = 0.0;
    prefix.push(acc);
    for v in x {
        acc += v;
        prefix.push(acc);
    }

    let block = |j: usize| prefix[j + m] - prefix[j];
    let terms = x.len() - 3 * m + 1;

    let sum: f64 = (0..terms)
        .map(|j| {
            let d = block(j + 2 * m) - 2.0 * block(j + m) + block(j);
            d * d
        })
        .sum();

    let m = m as f64;

    Some(sum / (2.0 * m.powi(4) * terms as f64))
}
