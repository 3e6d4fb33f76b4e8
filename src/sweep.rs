//! Orchestration of a full stability analysis over a sweep of averaging
//! times.
//!
//! A sweep converts the samples, plans the averaging times, and then walks the
//! tau set, evaluating every enabled estimator, classifying the noise and
//! bounding each estimate. Progress is reported to a [`ProgressSink`] after
//! every point and a [`CancelSignal`] is polled right after. Results are only
//! handed back once every point has been evaluated; a cancelled sweep returns
//! nothing but [`SweepOutcome::Cancelled`].

use crate::confidence::{confidence_interval, ConfidenceInterval};
use crate::deviation::{estimate, EstimatorKind};
use crate::error::{InputError, Result};
use crate::noise::{NoiseEstimate, NoiseIdentifier, NoiseLabel, NoiseMethod};
use crate::series::{convert_series, CentralFrequency, FractionalFrequency, Phase};
use crate::tau::{plan_taus_spaced, Spacing, TauPoint, TauSet};
use rayon::prelude::*;
use ringlog::{debug, info, warn};
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

// weight of the newest per-point timing in the moving average
const ETA_WEIGHT: f64 = 0.3;

/// Deviation values per estimator, index-aligned with the tau set.
pub type DeviationResult = BTreeMap<EstimatorKind, Vec<f64>>;

fn tau_count() -> usize {
    10
}

fn estimators() -> Vec<EstimatorKind> {
    EstimatorKind::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    tau_min: f64,
    tau_max: f64,
    #[serde(default = "tau_count")]
    tau_count: usize,
    #[serde(default)]
    central_frequency: CentralFrequency,
    sampling_frequency: f64,
    #[serde(default = "estimators")]
    estimators: Vec<EstimatorKind>,
    #[serde(default)]
    spacing: Spacing,
    #[serde(default)]
    noise_method: NoiseMethod,
    #[serde(default)]
    parallel: bool,
}

impl SweepConfig {
    /// A linear sweep of every estimator with the central frequency taken
    /// from the mean of the samples.
    pub fn new(tau_min: f64, tau_max: f64, tau_count: usize, sampling_frequency: f64) -> Self {
        Self {
            tau_min,
            tau_max,
            tau_count,
            central_frequency: CentralFrequency::AutoMean,
            sampling_frequency,
            estimators: estimators(),
            spacing: Spacing::Linear,
            noise_method: NoiseMethod::default(),
            parallel: false,
        }
    }

    pub fn with_central_frequency(mut self, central_frequency: CentralFrequency) -> Self {
        self.central_frequency = central_frequency;
        self
    }

    pub fn with_estimators(mut self, estimators: &[EstimatorKind]) -> Self {
        self.estimators = estimators.to_vec();
        self
    }

    pub fn with_spacing(mut self, spacing: Spacing) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_noise_method(mut self, noise_method: NoiseMethod) -> Self {
        self.noise_method = noise_method;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Checks the values that can be validated without the samples.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.estimators.is_empty() {
            return Err("at least one estimator must be enabled".into());
        }

        if self.tau_count == 0 {
            return Err("tau_count must be at least one".into());
        }

        if !(self.sampling_frequency.is_finite() && self.sampling_frequency > 0.0) {
            return Err(format!(
                "sampling_frequency must be positive, got {}",
                self.sampling_frequency
            ));
        }

        if !(self.tau_min.is_finite() && self.tau_max.is_finite()) {
            return Err("tau_min and tau_max must be finite".into());
        }

        if let CentralFrequency::Explicit(f0) = self.central_frequency {
            if !f0.is_finite() || f0 == 0.0 {
                return Err(format!("central_frequency must be nonzero, got {f0}"));
            }
        }

        Ok(())
    }

    pub fn tau_min(&self) -> f64 {
        self.tau_min
    }

    pub fn tau_max(&self) -> f64 {
        self.tau_max
    }

    pub fn tau_count(&self) -> usize {
        self.tau_count
    }

    pub fn central_frequency(&self) -> CentralFrequency {
        self.central_frequency
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    /// Enabled estimators, deduplicated, in a stable order.
    pub fn estimators(&self) -> Vec<EstimatorKind> {
        let mut estimators = self.estimators.clone();
        estimators.sort();
        estimators.dedup();
        estimators
    }

    pub fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn noise_method(&self) -> NoiseMethod {
        self.noise_method
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }
}

/// Receives progress after each evaluated tau point.
pub trait ProgressSink {
    /// `eta` is the estimated number of seconds until the sweep completes.
    fn progress(&mut self, done: usize, total: usize, eta: f64);
}

impl<F: FnMut(usize, usize, f64)> ProgressSink for F {
    fn progress(&mut self, done: usize, total: usize, eta: f64) {
        self(done, total, eta)
    }
}

/// A sink that discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _done: usize, _total: usize, _eta: f64) {}
}

/// Polled between tau points. Once it reports true the sweep stops.
pub trait CancelSignal {
    fn is_cancelled(&self) -> bool;
}

impl CancelSignal for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: CancelSignal + ?Sized> CancelSignal for Arc<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// A signal that never cancels.
pub struct Never;

impl CancelSignal for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Adapts a closure into a [`CancelSignal`].
pub struct CancelFn<F>(pub F);

impl<F: Fn() -> bool> CancelSignal for CancelFn<F> {
    fn is_cancelled(&self) -> bool {
        (self.0)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// The complete result of a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub central_frequency: f64,
    pub sampling_frequency: f64,
    pub samples: usize,
    pub taus: TauSet,
    pub deviations: DeviationResult,
    pub noise: Vec<NoiseEstimate>,
    pub intervals: BTreeMap<EstimatorKind, Vec<ConfidenceInterval>>,
}

impl SweepReport {
    pub fn deviation(&self, kind: EstimatorKind) -> Option<&[f64]> {
        self.deviations.get(&kind).map(|v| v.as_slice())
    }

    pub fn interval(&self, kind: EstimatorKind) -> Option<&[ConfidenceInterval]> {
        self.intervals.get(&kind).map(|v| v.as_slice())
    }

    pub fn noise_labels(&self) -> Vec<NoiseLabel> {
        self.noise.iter().map(|n| n.label).collect()
    }
}

#[derive(Debug, Clone)]
pub enum SweepOutcome {
    Completed(SweepReport),
    Cancelled,
}

impl SweepOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn report(&self) -> Option<&SweepReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Cancelled => None,
        }
    }

    pub fn into_report(self) -> Option<SweepReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Cancelled => None,
        }
    }
}

/// Runs a sweep with a fresh controller.
pub fn run_sweep(
    config: &SweepConfig,
    samples: &[f64],
    sink: &mut dyn ProgressSink,
    cancel: &dyn CancelSignal,
) -> Result<SweepOutcome> {
    SweepController::new(config.clone()).run(samples, sink, cancel)
}

/// Drives one analysis at a time and tracks where it is in its lifecycle.
pub struct SweepController {
    config: SweepConfig,
    state: SweepState,
}

impl SweepController {
    pub fn new(config: SweepConfig) -> Self {
        Self {
            config,
            state: SweepState::Idle,
        }
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Analyzes `samples` (Hz). Every call starts a new analysis from the raw
    /// samples.
    pub fn run(
        &mut self,
        samples: &[f64],
        sink: &mut dyn ProgressSink,
        cancel: &dyn CancelSignal,
    ) -> Result<SweepOutcome> {
        self.state = SweepState::Running;

        let analysis = match Analysis::prepare(&self.config, samples) {
            Ok(analysis) => analysis,
            Err(e) => {
                self.state = SweepState::Failed;
                return Err(e);
            }
        };

        let total = analysis.taus.len();
        let batch = if self.config.parallel {
            rayon::current_num_threads().max(1)
        } else {
            1
        };

        info!(
            "sweeping {} tau points from {}s to {}s over {} samples (f0: {} Hz)",
            total,
            self.config.tau_min,
            self.config.tau_max,
            samples.len(),
            analysis.f0
        );

        let mut results: Vec<PointResult> = Vec::with_capacity(total);
        let mut eta = Eta::default();

        for chunk in analysis.taus.chunks(batch) {
            let start = Instant::now();

            let evaluated: Vec<PointResult> = if chunk.len() > 1 {
                chunk.par_iter().map(|p| analysis.evaluate(*p)).collect()
            } else {
                chunk.iter().map(|p| analysis.evaluate(*p)).collect()
            };

            eta.record(start.elapsed().as_secs_f64() / chunk.len() as f64);

            for result in evaluated {
                results.push(result);
                let done = results.len();
                sink.progress(done, total, eta.remaining(total - done));
            }

            if cancel.is_cancelled() {
                info!("sweep cancelled after {} of {} points", results.len(), total);
                self.state = SweepState::Cancelled;
                return Ok(SweepOutcome::Cancelled);
            }
        }

        let report = analysis.into_report(results);

        self.state = SweepState::Completed;
        info!("sweep completed");

        Ok(SweepOutcome::Completed(report))
    }
}

/// Per-point cost tracked as an exponentially weighted moving average.
#[derive(Default)]
struct Eta {
    average: Option<f64>,
}

impl Eta {
    fn record(&mut self, seconds: f64) {
        self.average = Some(match self.average {
            Some(average) => average + ETA_WEIGHT * (seconds - average),
            None => seconds,
        });
    }

    fn remaining(&self, points: usize) -> f64 {
        self.average.unwrap_or(0.0) * points as f64
    }
}

struct PointResult {
    deviations: Vec<f64>,
    noise: NoiseEstimate,
    intervals: Vec<ConfidenceInterval>,
}

// read-only inputs shared by every point of one sweep
struct Analysis {
    f0: f64,
    fs: f64,
    y: FractionalFrequency,
    x: Phase,
    taus: TauSet,
    estimators: Vec<EstimatorKind>,
    identifier: Box<dyn NoiseIdentifier>,
}

impl Analysis {
    fn prepare(config: &SweepConfig, samples: &[f64]) -> Result<Self> {
        let estimators = config.estimators();

        if estimators.is_empty() {
            return Err(InputError::NoEstimators.into());
        }

        if samples.is_empty() {
            return Err(InputError::EmptySeries.into());
        }

        let fs = config.sampling_frequency;
        let f0 = config.central_frequency.resolve(samples)?;
        let (y, x) = convert_series(samples, f0, fs)?;

        let taus = plan_taus_spaced(
            config.spacing,
            config.tau_min,
            config.tau_max,
            config.tau_count,
            fs,
            y.len(),
        )?;

        if taus.len() < config.tau_count {
            debug!(
                "{} requested taus collapsed to {} distinct averaging factors",
                config.tau_count,
                taus.len()
            );
        }

        Ok(Self {
            f0,
            fs,
            y,
            x,
            taus,
            estimators,
            identifier: config.noise_method.identifier(),
        })
    }

    fn evaluate(&self, point: TauPoint) -> PointResult {
        let noise = self.identifier.identify(&self.y, point.m);

        let deviations: Vec<f64> = self
            .estimators
            .iter()
            .map(|kind| estimate(*kind, &self.x, point, self.fs))
            .collect();

        let intervals = deviations
            .iter()
            .map(|dev| confidence_interval(*dev, point, self.y.len(), noise.label))
            .collect();

        debug!(
            "tau: {}s m: {} noise: {:?} alpha: {:.2}",
            point.tau, point.m, noise.label, noise.alpha
        );

        PointResult {
            deviations,
            noise,
            intervals,
        }
    }

    fn into_report(self, results: Vec<PointResult>) -> SweepReport {
        let mut deviations: DeviationResult = BTreeMap::new();
        let mut intervals: BTreeMap<EstimatorKind, Vec<ConfidenceInterval>> = BTreeMap::new();
        let mut noise = Vec::with_capacity(results.len());

        for kind in &self.estimators {
            deviations.insert(*kind, Vec::with_capacity(results.len()));
            intervals.insert(*kind, Vec::with_capacity(results.len()));
        }

        for result in results {
            for (i, kind) in self.estimators.iter().enumerate() {
                if let Some(v) = deviations.get_mut(kind) {
                    v.push(result.deviations[i]);
                }
                if let Some(v) = intervals.get_mut(kind) {
                    v.push(result.intervals[i]);
                }
            }
            noise.push(result.noise);
        }

        for (kind, values) in &deviations {
            let missing = values.iter().filter(|v| v.is_nan()).count();
            if missing > 0 {
                warn!(
                    "{} ({kind}): {missing} tau points have too few samples for an estimate",
                    kind.description()
                );
            }
        }

        let unclassified = noise.iter().filter(|n| !n.label.is_classified()).count();
        if unclassified > 0 {
            warn!(
                "noise type undetermined at {unclassified} tau points, their intervals use one degree of freedom"
            );
        }

        SweepReport {
            central_frequency: self.f0,
            sampling_frequency: self.fs,
            samples: self.y.len(),
            taus: self.taus,
            deviations,
            noise,
            intervals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, RangeError};
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256PlusPlus;

    use std::cell::Cell;

    fn uniform_samples(n: usize, f0: f64, seed: u64) -> Vec<f64> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        (0..n)
            .map(|_| f0 * (1.0 + (rng.random::<f64>() - 0.5) * 1e-9))
            .collect()
    }

    #[test]
    fn completes_with_aligned_results() {
        let samples = uniform_samples(1000, 1e9, 42);
        let config = SweepConfig::new(0.2, 40.0, 10, 10.0)
            .with_central_frequency(CentralFrequency::Explicit(1e9));

        let mut controller = SweepController::new(config);
        assert_eq!(controller.state(), SweepState::Idle);

        let outcome = controller.run(&samples, &mut NoProgress, &Never).unwrap();
        assert_eq!(controller.state(), SweepState::Completed);

        let report = outcome.report().unwrap();
        let points = report.taus.len();
        assert!(points > 0 && points <= 10);
        assert_eq!(report.noise.len(), points);

        for kind in EstimatorKind::ALL {
            assert_eq!(report.deviation(kind).unwrap().len(), points);
            assert_eq!(report.interval(kind).unwrap().len(), points);
        }

        for dev in report.deviation(EstimatorKind::AdevOverlapping).unwrap() {
            assert!(dev.is_finite() && *dev >= 0.0);
        }
    }

    #[test]
    fn cancelled_after_first_point() {
        let samples = uniform_samples(1000, 1e9, 7);
        let config = SweepConfig::new(0.1, 1.0, 10, 10.0);
        let cancel = AtomicBool::new(false);
        let calls = Cell::new(0);

        let mut sink = |done: usize, total: usize, _eta: f64| {
            assert_eq!(total, 10);
            calls.set(calls.get() + 1);
            if done == 1 {
                cancel.store(true, Ordering::Relaxed);
            }
        };

        let mut controller = SweepController::new(config);
        let outcome = controller.run(&samples, &mut sink, &cancel).unwrap();

        assert!(outcome.is_cancelled());
        assert!(outcome.into_report().is_none());
        assert_eq!(controller.state(), SweepState::Cancelled);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn invalid_range_fails_before_estimating() {
        let samples = uniform_samples(1000, 1e9, 1);
        let config = SweepConfig::new(0.05, 1.0, 5, 10.0);
        let mut calls = 0;
        let mut sink = |_: usize, _: usize, _: f64| calls += 1;

        let mut controller = SweepController::new(config);
        let result = controller.run(&samples, &mut sink, &Never);

        assert!(matches!(
            result,
            Err(Error::InvalidRange(RangeError::BelowResolution { .. }))
        ));
        assert_eq!(controller.state(), SweepState::Failed);
        assert_eq!(calls, 0);
    }

    #[test]
    fn invalid_input_fails() {
        let config = SweepConfig::new(1.0, 2.0, 5, 1.0);
        assert_eq!(
            run_sweep(&config, &[], &mut NoProgress, &Never).unwrap_err(),
            Error::InvalidInput(InputError::EmptySeries)
        );

        let config = config.with_estimators(&[]);
        assert_eq!(
            run_sweep(&config, &[1.0; 10], &mut NoProgress, &Never).unwrap_err(),
            Error::InvalidInput(InputError::NoEstimators)
        );
    }

    #[test]
    fn progress_reaches_total() {
        let samples = uniform_samples(500, 10e6, 3);
        let config = SweepConfig::new(1.0, 100.0, 8, 1.0);
        let mut seen = Vec::new();
        let mut sink = |done: usize, total: usize, eta: f64| seen.push((done, total, eta));

        let outcome = run_sweep(&config, &samples, &mut sink, &Never).unwrap();
        let points = outcome.report().unwrap().taus.len();

        assert_eq!(seen.len(), points);
        for (i, (done, total, eta)) in seen.iter().enumerate() {
            assert_eq!(*done, i + 1);
            assert_eq!(*total, points);
            assert!(*eta >= 0.0);
        }
        assert_eq!(seen.last().map(|s| s.2), Some(0.0));
    }

    #[test]
    fn parallel_matches_sequential() {
        let samples = uniform_samples(2000, 5e6, 11);
        let config = SweepConfig::new(1.0, 1000.0, 25, 1.0).with_spacing(Spacing::Logarithmic);

        let sequential = run_sweep(&config, &samples, &mut NoProgress, &Never)
            .unwrap()
            .into_report()
            .unwrap();

        let config = config.with_parallel(true);
        let mut done = Vec::new();
        let mut sink = |d: usize, _: usize, _: f64| done.push(d);
        let parallel = run_sweep(&config, &samples, &mut sink, &Never)
            .unwrap()
            .into_report()
            .unwrap();

        assert_eq!(sequential.taus, parallel.taus);
        assert_eq!(done, (1..=parallel.taus.len()).collect::<Vec<_>>());

        for kind in EstimatorKind::ALL {
            let a = sequential.deviation(kind).unwrap();
            let b = parallel.deviation(kind).unwrap();
            for (a, b) in a.iter().zip(b) {
                assert!(a == b || (a.is_nan() && b.is_nan()));
            }
        }
        assert_eq!(sequential.noise_labels(), parallel.noise_labels());
    }

    #[test]
    fn parallel_cancellation() {
        let samples = uniform_samples(2000, 5e6, 12);
        let config = SweepConfig::new(1.0, 1000.0, 50, 1.0).with_parallel(true);
        let cancel = Arc::new(AtomicBool::new(true));

        let outcome = run_sweep(&config, &samples, &mut NoProgress, &cancel).unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn subset_of_estimators() {
        let samples = uniform_samples(400, 1e6, 5);
        let config = SweepConfig::new(1.0, 50.0, 5, 1.0)
            .with_estimators(&[EstimatorKind::Hdev, EstimatorKind::Hdev]);

        let report = run_sweep(&config, &samples, &mut NoProgress, &Never)
            .unwrap()
            .into_report()
            .unwrap();

        assert_eq!(report.deviations.len(), 1);
        assert!(report.deviation(EstimatorKind::Hdev).is_some());
        assert!(report.deviation(EstimatorKind::Adev).is_none());
    }

    #[test]
    fn intervals_bracket_deviations() {
        let samples = uniform_samples(1000, 1e9, 9);
        let config = SweepConfig::new(0.1, 50.0, 12, 10.0);

        let report = run_sweep(&config, &samples, &mut NoProgress, &Never)
            .unwrap()
            .into_report()
            .unwrap();

        for kind in EstimatorKind::ALL {
            let devs = report.deviation(kind).unwrap();
            let cis = report.interval(kind).unwrap();
            for ((dev, ci), noise) in devs.iter().zip(cis).zip(&report.noise) {
                if dev.is_nan() {
                    continue;
                }
                assert!(ci.contains(*dev));
                if !noise.label.is_classified() {
                    assert!(ci.fallback);
                }
            }
        }
    }

    #[test]
    fn closure_cancel_signal() {
        let samples = uniform_samples(300, 1e6, 4);
        let config = SweepConfig::new(1.0, 100.0, 10, 1.0);
        let polls = Cell::new(0);
        let cancel = CancelFn(|| {
            polls.set(polls.get() + 1);
            polls.get() >= 3
        });

        let outcome = run_sweep(&config, &samples, &mut NoProgress, &cancel).unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(polls.get(), 3);
    }
}
