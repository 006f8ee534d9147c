//! HR/SpO2 estimation seam and the physiological envelope.
//!
//! The numeric routine is a collaborator behind [`Estimator`]. Whatever it reports, the
//! core only accepts values inside the physiological envelope: a valid-flagged HR of
//! 230 bpm is still rejected.
//!
//! [`PeakIntervalEstimator`] is a small reference implementation so the pipeline can
//! run end to end without a vendor algorithm.

use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::trace;

use crate::pipeline::conditioning::ConditionedWindow;

/// Heart rates the core will publish, in bpm.
pub const HR_RANGE: RangeInclusive<i32> = 40..=200;

/// Oxygen saturations the core will publish, in percent.
pub const SPO2_RANGE: RangeInclusive<i32> = 70..=100;

/// Candidate values from one estimator call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RawEstimate {
    /// Heart rate in bpm
    pub hr: i32,
    /// Estimator's own confidence flag for `hr`
    pub hr_valid: bool,
    /// Oxygen saturation in percent
    pub spo2: i32,
    /// Estimator's own confidence flag for `spo2`
    pub spo2_valid: bool,
}

impl RawEstimate {
    /// HR if flagged valid and inside [`HR_RANGE`].
    pub fn accepted_hr(&self) -> Option<i32> {
        (self.hr_valid && HR_RANGE.contains(&self.hr)).then_some(self.hr)
    }

    /// SpO2 if flagged valid and inside [`SPO2_RANGE`].
    pub fn accepted_spo2(&self) -> Option<i32> {
        (self.spo2_valid && SPO2_RANGE.contains(&self.spo2)).then_some(self.spo2)
    }
}

/// Capability: derive HR and SpO2 candidates from a conditioned window.
///
/// Implementations must be deterministic and must not keep per-call state that
/// changes results.
pub trait Estimator: Send {
    /// Estimate from two equal-length channels.
    fn estimate(&self, window: &ConditionedWindow) -> RawEstimate;
}

impl<E: Estimator + ?Sized> Estimator for Box<E> {
    fn estimate(&self, window: &ConditionedWindow) -> RawEstimate {
        (**self).estimate(window)
    }
}

/// Reference estimator.
///
/// Each channel first has its settling removed: the best least-squares fit of a
/// constant plus two slow exponential decays, which is the shape a seeded recursive
/// band limiter leaves at the start of every window. What remains is the pulsatile
/// component.
///
/// HR is the first autocorrelation peak of the IR pulse between the 200 bpm lag and
/// half the window, refined by parabolic interpolation. The beat troughs must agree
/// with that period, otherwise HR is reported invalid. Windows holding fewer than two
/// beats never yield an HR.
///
/// SpO2 uses the ratio of ratios `R = (AC_red / DC_red) / (AC_ir / DC_ir)` with the
/// linear calibration `SpO2 = 110 - 25 R`. AC is the RMS of the pulsatile component
/// and DC the raw channel mean carried by the conditioned window.
#[derive(Debug, Clone)]
pub struct PeakIntervalEstimator {
    sample_rate_hz: f64,
}

/// Decay factors per sample tried for the settling fit.
const SETTLING_RATES: [f64; 13] = [
    0.86, 0.87, 0.88, 0.89, 0.90, 0.91, 0.92, 0.93, 0.94, 0.95, 0.96, 0.97, 0.98,
];

/// Pulsatile RMS below this many counts is treated as no pulse.
const MIN_AC_COUNTS: f64 = 0.01;

/// Normalised autocorrelation a period candidate must exceed.
const MIN_PERIODICITY: f64 = 0.5;

/// Troughs closer than this share of the period belong to the same beat.
const TROUGH_REFRACTORY: f64 = 0.6;

/// Largest relative disagreement between trough spacing and the period.
const TROUGH_TOLERANCE: f64 = 0.2;

impl PeakIntervalEstimator {
    /// Create an estimator for data sampled at `sample_rate_hz`.
    pub fn new(sample_rate_hz: f64) -> Self {
        Self { sample_rate_hz }
    }

    /// Shortest beat period in samples that is still within [`HR_RANGE`].
    pub fn refractory_samples(&self) -> usize {
        let max_bpm = f64::from(*HR_RANGE.end());
        ((self.sample_rate_hz * 60.0 / max_bpm).ceil() as usize).max(1)
    }

    /// Longest beat period in samples a window of `len` samples can measure.
    pub fn longest_period(&self, len: usize) -> usize {
        let min_bpm = f64::from(*HR_RANGE.start());
        ((self.sample_rate_hz * 60.0 / min_bpm).floor() as usize).min(len / 2)
    }

    fn heart_rate(&self, pulse: &[f64]) -> Option<i32> {
        let shortest = self.refractory_samples();
        let longest = self.longest_period(pulse.len());
        let period = autocorrelation_period(pulse, shortest, longest)?;

        // Intensity dips at each beat
        let inverted: Vec<f64> = pulse.iter().map(|v| -v).collect();
        let refractory = ((period * TROUGH_REFRACTORY) as usize).max(1);
        let troughs = find_peaks(&inverted, refractory);
        if troughs.len() < 2 {
            trace!(period, troughs = troughs.len(), "Too few beats in window");
            return None;
        }
        let span = (troughs[troughs.len() - 1] - troughs[0]) as f64;
        let spacing = span / (troughs.len() - 1) as f64;
        if (spacing - period).abs() > period * TROUGH_TOLERANCE {
            trace!(period, spacing, "Beat spacing disagrees with period");
            return None;
        }

        trace!(period, beats = troughs.len(), "IR period located");
        Some((60.0 * self.sample_rate_hz / period).round() as i32)
    }

    fn saturation(ir_ac: f64, red_ac: f64, window: &ConditionedWindow) -> Option<i32> {
        let (ir_dc, red_dc) = (window.ir_dc(), window.red_dc());
        if ir_ac < MIN_AC_COUNTS || red_ac < MIN_AC_COUNTS || ir_dc <= 0.0 || red_dc <= 0.0 {
            return None;
        }
        let ratio = (red_ac / red_dc) / (ir_ac / ir_dc);
        ratio
            .is_finite()
            .then(|| (110.0 - 25.0 * ratio).round() as i32)
    }
}

impl Estimator for PeakIntervalEstimator {
    fn estimate(&self, window: &ConditionedWindow) -> RawEstimate {
        if window.len() < 4 || self.sample_rate_hz <= 0.0 {
            return RawEstimate::default();
        }

        let ir_pulse = remove_settling(window.ir());
        let red_pulse = remove_settling(window.red());
        let ir_ac = rms(&ir_pulse);

        let hr = if ir_ac < MIN_AC_COUNTS {
            None
        } else {
            self.heart_rate(&ir_pulse)
        };
        let spo2 = Self::saturation(ir_ac, rms(&red_pulse), window);

        RawEstimate {
            hr: hr.unwrap_or_default(),
            hr_valid: hr.is_some(),
            spo2: spo2.unwrap_or_default(),
            spo2_valid: spo2.is_some(),
        }
    }
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Residual after the best fit of `c0 + c1 * a^i + c2 * b^i` over [`SETTLING_RATES`].
fn remove_settling(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let powers: Vec<Vec<f64>> = SETTLING_RATES
        .iter()
        .map(|&rate| (0..n).map(|i| rate.powi(i as i32)).collect())
        .collect();
    let constant = vec![1.0; n];

    let mut best: Option<(Vec<f64>, f64)> = None;
    for (a, fast) in powers.iter().enumerate() {
        for slow in &powers[a + 1..] {
            let basis = [&constant[..], &fast[..], &slow[..]];
            let Some(residual) = fit_residual(values, basis) else {
                continue;
            };
            let sse: f64 = residual.iter().map(|r| r * r).sum();
            if best.as_ref().map_or(true, |(_, lowest)| sse < *lowest) {
                best = Some((residual, sse));
            }
        }
    }

    match best {
        Some((residual, _)) => residual,
        None => {
            let mean = values.iter().sum::<f64>() / n.max(1) as f64;
            values.iter().map(|v| v - mean).collect()
        }
    }
}

fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(p, q)| p * q).sum()
}

/// Least-squares residual of `values` against three basis columns.
fn fit_residual(values: &[f64], basis: [&[f64]; 3]) -> Option<Vec<f64>> {
    let mut normal = [[0.0; 4]; 3];
    for (row, &bi) in basis.iter().enumerate() {
        for (col, &bj) in basis.iter().enumerate() {
            normal[row][col] = dot(bi, bj);
        }
        normal[row][3] = dot(bi, values);
    }
    let coeffs = solve3(normal)?;

    Some(
        values
            .iter()
            .enumerate()
            .map(|(i, v)| v - (0..3).map(|j| coeffs[j] * basis[j][i]).sum::<f64>())
            .collect(),
    )
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 system.
fn solve3(mut m: [[f64; 4]; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&p, &q| m[p][col].abs().total_cmp(&m[q][col].abs()))?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| m[row][k] * x[k]).sum();
        x[row] = (m[row][3] - tail) / m[row][row];
    }
    Some(x)
}

/// Lag of the first normalised autocorrelation peak in `shortest..=longest`, refined
/// to a fraction of a sample.
fn autocorrelation_period(values: &[f64], shortest: usize, longest: usize) -> Option<f64> {
    let n = values.len();
    let shortest = shortest.max(1);
    if longest < shortest || longest + 1 >= n {
        return None;
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let centred: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let energy: f64 = centred.iter().map(|v| v * v).sum();
    if energy <= 0.0 {
        return None;
    }

    // Unbiased, normalised so that lag 0 is 1
    let acf: Vec<f64> = (0..=longest + 1)
        .map(|lag| {
            let sum: f64 = centred.iter().zip(&centred[lag..]).map(|(a, b)| a * b).sum();
            sum / energy * n as f64 / (n - lag) as f64
        })
        .collect();

    let lag = (shortest..=longest).find(|&lag| {
        acf[lag] > MIN_PERIODICITY && acf[lag] > acf[lag - 1] && acf[lag] >= acf[lag + 1]
    })?;

    let (left, centre, right) = (acf[lag - 1], acf[lag], acf[lag + 1]);
    let curvature = left - 2.0 * centre + right;
    let offset = if curvature < 0.0 {
        0.5 * (left - right) / curvature
    } else {
        0.0
    };
    Some(lag as f64 + offset)
}

/// Indices of local maxima in the upper half of the range, at least `refractory` apart.
///
/// Within the refractory distance the higher peak wins.
fn find_peaks(values: &[f64], refractory: usize) -> Vec<usize> {
    let highest = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lowest = values.iter().copied().fold(f64::INFINITY, f64::min);
    if highest <= lowest {
        return Vec::new();
    }
    let threshold = lowest + 0.5 * (highest - lowest);

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..values.len().saturating_sub(1) {
        let v = values[i];
        if v <= threshold || v <= values[i - 1] || v < values[i + 1] {
            continue;
        }
        match peaks.last_mut() {
            Some(last) if i - *last < refractory => {
                if v > values[*last] {
                    *last = i;
                }
            }
            _ => peaks.push(i),
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BandLimitConfig, ConditioningConfig};
    use crate::pipeline::conditioning::ConditioningFilter;
    use crate::pipeline::window::WindowSnapshot;
    use crate::sensor::mock::pulse_shape;
    use std::f64::consts::PI;

    const RATE: f64 = 25.0;

    /// Raw sinusoidal pulse train with the red modulation set for `spo2`.
    fn pulse_window(bpm: f64, spo2: f64, len: usize) -> WindowSnapshot {
        let ratio = (110.0 - spo2) / 25.0;
        let (ir_dc, red_dc, pi) = (60_000.0, 50_000.0, 0.08);
        let wave = |i: usize| (2.0 * PI * bpm / 60.0 * i as f64 / RATE).sin();
        WindowSnapshot {
            ir: (0..len)
                .map(|i| (ir_dc * (1.0 + pi / 2.0 * wave(i))) as u32)
                .collect(),
            red: (0..len)
                .map(|i| (red_dc * (1.0 + ratio * pi / 2.0 * wave(i))) as u32)
                .collect(),
        }
    }

    /// Raw window with a systolic dip and dicrotic bump per beat, as a finger gives.
    fn ppg_window(bpm: f64, spo2: f64, len: usize) -> WindowSnapshot {
        let ratio = (110.0 - spo2) / 25.0;
        let shape = |i: usize| pulse_shape((i as f64 / RATE * bpm / 60.0).fract());
        WindowSnapshot {
            ir: (0..len)
                .map(|i| (60_000.0 - 9_000.0 * shape(i)) as u32)
                .collect(),
            red: (0..len)
                .map(|i| (51_000.0 - 51_000.0 * 0.15 * ratio * shape(i)) as u32)
                .collect(),
        }
    }

    fn passthrough(snapshot: &WindowSnapshot) -> ConditionedWindow {
        ConditioningFilter::new(&ConditioningConfig {
            smoothing_window: 1,
            band_limit: BandLimitConfig {
                enabled: false,
                ..Default::default()
            },
            remove_baseline: false,
        })
        .apply(snapshot)
    }

    fn default_conditioning(snapshot: &WindowSnapshot) -> ConditionedWindow {
        ConditioningFilter::new(&ConditioningConfig::default()).apply(snapshot)
    }

    #[test]
    fn envelope_rejects_out_of_range_even_when_flagged_valid() {
        let estimate = RawEstimate {
            hr: 230,
            hr_valid: true,
            spo2: 65,
            spo2_valid: true,
        };
        assert_eq!(estimate.accepted_hr(), None);
        assert_eq!(estimate.accepted_spo2(), None);
    }

    #[test]
    fn envelope_bounds_are_inclusive_and_independent() {
        let estimate = RawEstimate {
            hr: 40,
            hr_valid: true,
            spo2: 100,
            spo2_valid: false,
        };
        assert_eq!(estimate.accepted_hr(), Some(40));
        assert_eq!(estimate.accepted_spo2(), None);

        let estimate = RawEstimate {
            hr: 200,
            hr_valid: false,
            spo2: 70,
            spo2_valid: true,
        };
        assert_eq!(estimate.accepted_hr(), None);
        assert_eq!(estimate.accepted_spo2(), Some(70));
    }

    #[test]
    fn period_limits_follow_the_hr_envelope() {
        let estimator = PeakIntervalEstimator::new(25.0);
        assert_eq!(estimator.refractory_samples(), 8);
        assert_eq!(estimator.longest_period(50), 25);
        assert_eq!(estimator.longest_period(200), 37);
        assert_eq!(PeakIntervalEstimator::new(100.0).refractory_samples(), 30);
    }

    #[test]
    fn resting_pulse_is_recovered() {
        let window = passthrough(&pulse_window(72.0, 97.0, 50));
        let estimate = PeakIntervalEstimator::new(RATE).estimate(&window);
        assert!(estimate.hr_valid);
        assert!((70..=74).contains(&estimate.hr), "hr = {}", estimate.hr);
    }

    #[test]
    fn fast_pulse_is_recovered() {
        let window = passthrough(&pulse_window(120.0, 97.0, 50));
        let estimate = PeakIntervalEstimator::new(RATE).estimate(&window);
        assert!(estimate.hr_valid);
        assert!((117..=123).contains(&estimate.hr), "hr = {}", estimate.hr);
    }

    #[test]
    fn saturation_follows_the_ratio_of_ratios() {
        let window = passthrough(&pulse_window(72.0, 95.0, 50));
        let estimate = PeakIntervalEstimator::new(RATE).estimate(&window);
        assert!(estimate.spo2_valid);
        assert!((94..=96).contains(&estimate.spo2), "spo2 = {}", estimate.spo2);
    }

    #[test]
    fn dicrotic_pulse_through_default_conditioning_is_not_doubled() {
        let estimator = PeakIntervalEstimator::new(RATE);
        for (bpm, tolerance) in [(60, 4), (72, 3), (100, 3), (140, 3)] {
            let window = default_conditioning(&ppg_window(f64::from(bpm), 97.0, 50));
            let estimate = estimator.estimate(&window);
            assert!(estimate.hr_valid, "no HR at {bpm} bpm");
            assert!(
                (estimate.hr - bpm).abs() <= tolerance,
                "{bpm} bpm estimated as {}",
                estimate.hr
            );
            assert!(estimate.spo2_valid);
            assert!((96..=98).contains(&estimate.spo2), "spo2 = {}", estimate.spo2);
        }
    }

    #[test]
    fn fewer_than_two_beats_give_no_hr() {
        // 40 bpm is 37.5 samples per beat: a 2 s window holds 1.3 beats
        let window = passthrough(&pulse_window(40.0, 97.0, 50));
        let estimate = PeakIntervalEstimator::new(RATE).estimate(&window);
        assert!(!estimate.hr_valid);
        assert!(estimate.spo2_valid);
    }

    #[test]
    fn flat_window_yields_nothing_valid() {
        let flat = WindowSnapshot {
            ir: vec![60_000; 50],
            red: vec![50_000; 50],
        };
        for window in [passthrough(&flat), default_conditioning(&flat)] {
            let estimate = PeakIntervalEstimator::new(RATE).estimate(&window);
            assert!(!estimate.hr_valid);
            assert!(!estimate.spo2_valid);
        }
    }

    #[test]
    fn tiny_window_is_rejected() {
        let window = passthrough(&pulse_window(72.0, 97.0, 3));
        assert_eq!(
            PeakIntervalEstimator::new(RATE).estimate(&window),
            RawEstimate::default()
        );
    }

    #[test]
    fn settling_decay_is_removed() {
        let settling: Vec<f64> = (0..50)
            .map(|i| 1_000.0 + 5_000.0 * 0.95_f64.powi(i) + 3_000.0 * 0.90_f64.powi(i))
            .collect();
        let residual = remove_settling(&settling);
        assert!(residual.iter().all(|r| r.abs() < 0.5), "{residual:?}");
    }

    #[test]
    fn autocorrelation_finds_the_fundamental() {
        // Period 20 with a strong second harmonic
        let signal: Vec<f64> = (0..60)
            .map(|i| {
                let phase = 2.0 * PI * f64::from(i) / 20.0;
                phase.sin() + 0.6 * (2.0 * phase).sin()
            })
            .collect();
        let period = autocorrelation_period(&signal, 8, 30).unwrap_or_default();
        assert!((period - 20.0).abs() < 0.5, "period = {period}");
    }

    #[test]
    fn close_peaks_merge_keeping_the_higher() {
        let values = [0.0, 5.0, 0.0, 8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 6.0, 0.0];
        assert_eq!(find_peaks(&values, 4), vec![3, 9]);
    }
}
