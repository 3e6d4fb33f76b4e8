use crate::noise::NoiseLabel;
use crate::tau::TauPoint;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Two-sided coverage of the reported intervals (one standard deviation).
pub const CONFIDENCE_LEVEL: f64 = 0.682_689_492_137_086;

// degrees of freedom used when the noise type, and therefore the estimator
// variance, is unknown
const FALLBACK_EDF: f64 = 1.0;

/// Bounds around a deviation estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// Equivalent degrees of freedom the bounds were derived with.
    pub edf: f64,
    /// Set when the noise type could not be used and the bounds were derived
    /// with a single degree of freedom instead.
    pub fallback: bool,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Equivalent degrees of freedom for a deviation estimate.
pub trait EdfModel {
    /// `n` is the number of frequency samples in the record. Returns `None`
    /// when the model has no formula for this noise type.
    fn edf(&self, n: usize, m: usize, noise: NoiseLabel) -> Option<f64>;
}

/// Closed-form approximations for the overlapping Allan variance, one per
/// power-law process, in terms of the number of phase points and the
/// averaging factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEdf;

impl EdfModel for SimpleEdf {
    fn edf(&self, n: usize, m: usize, noise: NoiseLabel) -> Option<f64> {
        if m == 0 {
            return None;
        }

        // phase points
        let n = (n + 1) as f64;
        let m = m as f64;

        let edf = match noise {
            NoiseLabel::WhitePm => (n + 1.0) * (n - 2.0 * m) / (2.0 * (n - m)),
            NoiseLabel::FlickerPm => {
                let a = ((n - 1.0) / (2.0 * m)).ln();
                let b = ((2.0 * m + 1.0) * (n - 1.0) / 4.0).ln();
                (a * b).sqrt().exp()
            }
            NoiseLabel::WhiteFm => {
                (3.0 * (n - 1.0) / (2.0 * m) - 2.0 * (n - 2.0) / n) * 4.0 * m * m
                    / (4.0 * m * m + 5.0)
            }
            NoiseLabel::FlickerFm => {
                if m == 1.0 {
                    2.0 * (n - 2.0).powi(2) / (2.3 * n - 4.9)
                } else {
                    5.0 * n * n / (4.0 * m * (n + 3.0 * m))
                }
            }
            NoiseLabel::RandomWalkFm => {
                (n - 2.0) / m * ((n - 1.0).powi(2) - 3.0 * m * (n - 1.0) + 4.0 * m * m)
                    / (n - 3.0).powi(2)
            }
            NoiseLabel::Unclassified => return None,
        };

        Some(edf)
    }
}

/// Confidence interval for a deviation at one averaging factor, using the
/// [`SimpleEdf`] model.
pub fn confidence_interval(
    deviation: f64,
    point: TauPoint,
    n: usize,
    noise: NoiseLabel,
) -> ConfidenceInterval {
    confidence_interval_with(&SimpleEdf, deviation, point, n, noise)
}

pub fn confidence_interval_with(
    model: &dyn EdfModel,
    deviation: f64,
    point: TauPoint,
    n: usize,
    noise: NoiseLabel,
) -> ConfidenceInterval {
    match model.edf(n, point.m, noise) {
        Some(edf) if edf.is_finite() && edf >= 1.0 => chi_squared_bounds(deviation, edf, false),
        _ => chi_squared_bounds(deviation, FALLBACK_EDF, true),
    }
}

/// Interval from the chi-squared distribution of `edf * s^2 / sigma^2`.
pub fn chi_squared_bounds(deviation: f64, edf: f64, fallback: bool) -> ConfidenceInterval {
    let p = 1.0 - CONFIDENCE_LEVEL;

    let (lower, upper) = match ChiSquared::new(edf) {
        Ok(chi2) if deviation.is_finite() => {
            let hi = chi2.inverse_cdf(1.0 - p / 2.0);
            let lo = chi2.inverse_cdf(p / 2.0);
            (
                deviation * (edf / hi).sqrt(),
                deviation * (edf / lo).sqrt(),
            )
        }
        _ => (f64::NAN, f64::NAN),
    };

    ConfidenceInterval {
        lower,
        upper,
        edf,
        fallback,
    }
}
