//! Time-domain deviation estimators over phase data.
//!
//! Each estimator is a pure function of the phase record and one averaging
//! factor. When the record is too short to form a single difference at the
//! requested factor the result is `NaN` rather than an error, so a sweep can
//! keep going past the usable end of the record.

use crate::series::Phase;
use crate::tau::TauPoint;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EstimatorKind {
    /// Non-overlapping Allan deviation.
    #[serde(rename = "ADEV")]
    Adev,
    /// Overlapping Allan deviation.
    #[serde(rename = "ADEV_OVLP", alias = "ADEV ovlp")]
    AdevOverlapping,
    /// Overlapping Hadamard deviation.
    #[serde(rename = "HDEV")]
    Hdev,
}

impl EstimatorKind {
    pub const ALL: [EstimatorKind; 3] = [Self::Adev, Self::AdevOverlapping, Self::Hdev];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Adev => "ADEV",
            Self::AdevOverlapping => "ADEV_OVLP",
            Self::Hdev => "HDEV",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Adev => "Allan deviation",
            Self::AdevOverlapping => "overlapping Allan deviation",
            Self::Hdev => "Hadamard deviation",
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EstimatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADEV" | "adev" => Ok(Self::Adev),
            "ADEV_OVLP" | "adev_ovlp" | "ADEV ovlp" | "OADEV" | "oadev" => {
                Ok(Self::AdevOverlapping)
            }
            "HDEV" | "hdev" => Ok(Self::Hdev),
            other => Err(format!("unknown estimator: {other}")),
        }
    }
}

/// Evaluates the selected estimator at one averaging factor. `fs` is the
/// sampling frequency the phase record was integrated with.
pub fn estimate(kind: EstimatorKind, phase: &Phase, point: TauPoint, fs: f64) -> f64 {
    let tau = point.m as f64 / fs;

    match kind {
        EstimatorKind::Adev => adev(phase, point.m, tau),
        EstimatorKind::AdevOverlapping => adev_overlapping(phase, point.m, tau),
        EstimatorKind::Hdev => hdev(phase, point.m, tau),
    }
}

#[inline]
fn second_difference(x: &[f64], i: usize, m: usize) -> f64 {
    x[i + 2 * m] - 2.0 * x[i + m] + x[i]
}

#[inline]
fn third_difference(x: &[f64], i: usize, m: usize) -> f64 {
    x[i + 3 * m] - 3.0 * x[i + 2 * m] + 3.0 * x[i + m] - x[i]
}

// whether `len` points hold at least one difference of `order` spans of `m`
fn spans(len: usize, m: usize, order: usize) -> bool {
    m != 0 && m.checked_mul(order).is_some_and(|w| len > w)
}

fn normalize(sum: f64, terms: usize, scale: f64, tau: f64) -> f64 {
    if terms == 0 || !(tau.is_finite() && tau > 0.0) {
        return f64::NAN;
    }

    (sum / (scale * terms as f64 * tau * tau)).sqrt()
}

/// Non-overlapping Allan deviation: windows start every `m` samples.
pub fn adev(phase: &[f64], m: usize, tau: f64) -> f64 {
    if !spans(phase.len(), m, 2) {
        return f64::NAN;
    }

    let last = phase.len() - 2 * m;
    let mut sum = 0.0;
    let mut terms = 0;

    for i in (0..last).step_by(m) {
        let d = second_difference(phase, i, m);
        sum += d * d;
        terms += 1;
    }

    normalize(sum, terms, 2.0, tau)
}

/// Overlapping Allan deviation: a window starts at every sample.
pub fn adev_overlapping(phase: &[f64], m: usize, tau: f64) -> f64 {
    if !spans(phase.len(), m, 2) {
        return f64::NAN;
    }

    let terms = phase.len() - 2 * m;
    let sum: f64 = (0..terms)
        .map(|i| {
            let d = second_difference(phase, i, m);
            d * d
        })
        .sum();

    normalize(sum, terms, 2.0, tau)
}

/// Overlapping Hadamard deviation, insensitive to linear frequency drift.
pub fn hdev(phase: &[f64], m: usize, tau: f64) -> f64 {
    if !spans(phase.len(), m, 3) {
        return f64::NAN;
    }

    let terms = phase.len() - 3 * m;
    let sum: f64 = (0..terms)
        .map(|i| {
            let d = third_difference(phase, i, m);
            d * d
        })
        .sum();

    normalize(sum, terms, 6.0, tau)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{FractionalFrequency, Phase};

    fn phase_of(y: Vec<f64>, tau0: f64) -> Phase {
        Phase::from_fractional(&FractionalFrequency::new(y), tau0)
    }

    #[test]
    fn overlap_matches_at_unit_factor() {
        let y: Vec<f64> = (0..257).map(|i| ((i * 37 % 101) as f64 - 50.0) * 1e-9).collect();
        let x = phase_of(y, 0.5);
        let point = TauPoint::new(1, 2.0);

        let a = estimate(EstimatorKind::Adev, &x, point, 2.0);
        let b = estimate(EstimatorKind::AdevOverlapping, &x, point, 2.0);

        assert!(a.is_finite());
        assert!((a - b).abs() <= 1e-12 * a.abs());
    }

    #[test]
    fn constant_frequency_offset_has_zero_deviation() {
        let x = phase_of(vec![3e-9; 100], 1.0);

        for kind in EstimatorKind::ALL {
            for m in [1, 2, 5, 10] {
                let dev = estimate(kind, &x, TauPoint::new(m, 1.0), 1.0);
                assert!(dev.abs() < 1e-20, "{kind} at m={m}: {dev}");
            }
        }
    }

    #[test]
    fn hadamard_ignores_linear_drift() {
        // frequency ramps linearly, so the phase is quadratic
        let y: Vec<f64> = (0..200).map(|i| i as f64 * 1e-10).collect();
        let x = phase_of(y, 1.0);
        let point = TauPoint::new(4, 1.0);

        let hdev = estimate(EstimatorKind::Hdev, &x, point, 1.0);
        let adev = estimate(EstimatorKind::AdevOverlapping, &x, point, 1.0);

        assert!(hdev < 1e-18);
        assert!(adev > 1e-11);
    }

    #[test]
    fn alternating_frequency_known_value() {
        // y alternates +a/-a; at m=1 every second difference is +-2a*tau0
        let a = 1e-6;
        let y: Vec<f64> = (0..64).map(|i| if i % 2 == 0 { a } else { -a }).collect();
        let x = phase_of(y, 1.0);

        let dev = estimate(EstimatorKind::AdevOverlapping, &x, TauPoint::new(1, 1.0), 1.0);
        // sqrt((2a)^2 / 2) = sqrt(2) * a
        assert!((dev - 2f64.sqrt() * a).abs() < 1e-15);
    }

    #[test]
    fn insufficient_samples_is_nan() {
        let x = phase_of(vec![1e-9; 10], 1.0);

        assert!(estimate(EstimatorKind::Adev, &x, TauPoint::new(5, 1.0), 1.0).is_finite());
        assert!(estimate(EstimatorKind::Adev, &x, TauPoint::new(6, 1.0), 1.0).is_nan());
        assert!(estimate(EstimatorKind::AdevOverlapping, &x, TauPoint::new(6, 1.0), 1.0).is_nan());
        assert!(estimate(EstimatorKind::Hdev, &x, TauPoint::new(3, 1.0), 1.0).is_finite());
        assert!(estimate(EstimatorKind::Hdev, &x, TauPoint::new(4, 1.0), 1.0).is_nan());
    }

    #[test]
    fn huge_factor_is_nan() {
        let x = phase_of(vec![1e-9; 100], 1.0);
        let point = TauPoint {
            tau: 1.0,
            m: usize::MAX / 2 + 1,
        };

        for kind in EstimatorKind::ALL {
            assert!(estimate(kind, &x, point, 1.0).is_nan(), "{kind}");
        }
        assert!(hdev(&x, usize::MAX / 3 + 1, 1.0).is_nan());
        assert!(adev(&x, 0, 1.0).is_nan());
    }

    #[test]
    fn non_overlapping_uses_fewer_terms() {
        // a single frequency spike reaches two non-overlapping windows but
        // eight overlapping ones
        let mut y = vec![0.0; 40];
        y[17] = 1e-8;
        let x = phase_of(y, 1.0);
        let point = TauPoint::new(4, 1.0);

        let a = estimate(EstimatorKind::Adev, &x, point, 1.0);
        let b = estimate(EstimatorKind::AdevOverlapping, &x, point, 1.0);
        assert!(a > 0.0 && b > 0.0);
        assert!(a != b);
    }

    #[test]
    fn parse_and_display() {
        for kind in EstimatorKind::ALL {
            assert_eq!(kind.to_string().parse::<EstimatorKind>(), Ok(kind));
        }
        assert_eq!("ADEV ovlp".parse(), Ok(EstimatorKind::AdevOverlapping));
        assert!("MDEV".parse::<EstimatorKind>().is_err());
    }

    #[test]
    fn descriptions_are_distinct() {
        let mut descriptions: Vec<&str> =
            EstimatorKind::ALL.iter().map(|k| k.description()).collect();
        descriptions.sort_unstable();
        descriptions.dedup();
        assert_eq!(descriptions.len(), EstimatorKind::ALL.len());
        assert_eq!(EstimatorKind::Hdev.description(), "Hadamard deviation");
    }
}
