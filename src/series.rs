use crate::error::{InputError, Result};
use serde::{Deserialize, Serialize};

use std::ops::Deref;

/// Normalized frequency offsets `y_i = (f_i - f_0) / f_0`.
#[derive(Debug, Clone, PartialEq)]
pub struct FractionalFrequency {
    values: Box<[f64]>,
}

impl FractionalFrequency {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: values.into_boxed_slice(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl Deref for FractionalFrequency {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.values
    }
}

/// Phase error in seconds, integrated from fractional frequency. Always one
/// element longer than the series it was integrated from and starts at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Phase {
    values: Box<[f64]>,
}

impl Phase {
    pub fn from_fractional(y: &FractionalFrequency, tau0: f64) -> Self {
        let mut values = Vec::with_capacity(y.len() + 1);
        let mut x = 0.0;
        values.push(x);

        for value in y.iter() {
            x += value * tau0;
            values.push(x);
        }

        Self {
            values: values.into_boxed_slice(),
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl Deref for Phase {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.values
    }
}

/// How the nominal frequency `f_0` is chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CentralFrequencyDef", into = "CentralFrequencyDef")]
pub enum CentralFrequency {
    Explicit(f64),
    AutoMean,
}

impl Default for CentralFrequency {
    fn default() -> Self {
        Self::AutoMean
    }
}

impl CentralFrequency {
    /// Returns the central frequency for these samples. `AutoMean` uses the
    /// arithmetic mean of the samples.
    pub fn resolve(&self, samples: &[f64]) -> Result<f64> {
        let f0 = match self {
            Self::Explicit(f0) => *f0,
            Self::AutoMean => {
                if samples.is_empty() {
                    return Err(InputError::EmptySeries.into());
                }
                if let Some(index) = samples.iter().position(|f| !f.is_finite()) {
                    return Err(InputError::NonFiniteSample { index }.into());
                }
                samples.iter().sum::<f64>() / samples.len() as f64
            }
        };

        if !f0.is_finite() {
            return Err(InputError::NonFiniteCentralFrequency.into());
        }

        if f0 == 0.0 {
            return Err(InputError::ZeroCentralFrequency.into());
        }

        Ok(f0)
    }
}

// accepts either a number in Hz or the keyword "auto"
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CentralFrequencyDef {
    Hz(f64),
    Keyword(String),
}

impl TryFrom<CentralFrequencyDef> for CentralFrequency {
    type Error = String;

    fn try_from(value: CentralFrequencyDef) -> std::result::Result<Self, String> {
        match value {
            CentralFrequencyDef::Hz(f0) => Ok(Self::Explicit(f0)),
            CentralFrequencyDef::Keyword(k) => match k.as_str() {
                "auto" | "auto-mean" | "mean" => Ok(Self::AutoMean),
                other => Err(format!(
                    "unknown central frequency '{other}', expected a number or \"auto\""
                )),
            },
        }
    }
}

impl From<CentralFrequency> for CentralFrequencyDef {
    fn from(value: CentralFrequency) -> Self {
        match value {
            CentralFrequency::Explicit(f0) => Self::Hz(f0),
            CentralFrequency::AutoMean => Self::Keyword("auto".into()),
        }
    }
}

/// Converts raw frequency samples in Hz into fractional frequency and phase
/// error.
pub fn convert_series(
    frequencies: &[f64],
    f0: f64,
    fs: f64,
) -> Result<(FractionalFrequency, Phase)> {
    if !(fs.is_finite() && fs > 0.0) {
        return Err(InputError::InvalidSamplingFrequency(fs).into());
    }

    if !f0.is_finite() {
        return Err(InputError::NonFiniteCentralFrequency.into());
    }

    if f0 == 0.0 {
        return Err(InputError::ZeroCentralFrequency.into());
    }

    if frequencies.is_empty() {
        return Err(InputError::EmptySeries.into());
    }

    if let Some(index) = frequencies.iter().position(|f| !f.is_finite()) {
        return Err(InputError::NonFiniteSample { index }.into());
    }

    let y = FractionalFrequency::new(frequencies.iter().map(|f| (f - f0) / f0).collect());
    let x = Phase::from_fractional(&y, 1.0 / fs);

    Ok((y, x))
}
