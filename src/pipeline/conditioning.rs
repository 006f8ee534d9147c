//! Conditioning filters applied to a window copy before estimation.
//!
//! Stages always run in this order, each optional:
//!
//! 1. causal moving average over `w` samples (shorter window near the start)
//! 2. band limiter: first-order high-pass seeded with sample 0, then first-order
//!    low-pass on the high-pass output
//! 3. baseline removal (subtract the channel mean)
//!
//! The raw window is never modified. The raw per-channel mean travels with the
//! conditioned data because the high-pass stage removes it and ratio-based SpO2
//! estimators need it.

use tracing::trace;

use crate::config::{BandLimitConfig, ConditioningConfig};
use crate::pipeline::window::WindowSnapshot;

/// Window after conditioning, one `f64` series per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionedWindow {
    red: Vec<f64>,
    ir: Vec<f64>,
    red_dc: f64,
    ir_dc: f64,
}

impl ConditionedWindow {
    /// Conditioned red channel.
    pub fn red(&self) -> &[f64] {
        &self.red
    }

    /// Conditioned infrared channel.
    pub fn ir(&self) -> &[f64] {
        &self.ir
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.ir.len()
    }

    /// Whether there is no data.
    pub fn is_empty(&self) -> bool {
        self.ir.is_empty()
    }

    /// Mean of the raw red channel before conditioning.
    pub fn red_dc(&self) -> f64 {
        self.red_dc
    }

    /// Mean of the raw infrared channel before conditioning.
    pub fn ir_dc(&self) -> f64 {
        self.ir_dc
    }
}

/// Stateless conditioning pipeline with fixed coefficients.
#[derive(Debug, Clone)]
pub struct ConditioningFilter {
    smoothing_window: usize,
    band_limit: Option<BandLimitConfig>,
    remove_baseline: bool,
}

impl ConditioningFilter {
    /// Build the filter from configuration.
    pub fn new(config: &ConditioningConfig) -> Self {
        Self {
            smoothing_window: config.smoothing_window,
            band_limit: config.band_limit.enabled.then_some(config.band_limit),
            remove_baseline: config.remove_baseline,
        }
    }

    /// Condition both channels of a snapshot.
    pub fn apply(&self, snapshot: &WindowSnapshot) -> ConditionedWindow {
        let red_raw = to_f64(&snapshot.red);
        let ir_raw = to_f64(&snapshot.ir);
        let red_dc = mean(&red_raw);
        let ir_dc = mean(&ir_raw);

        let red = self.condition_channel(red_raw);
        let ir = self.condition_channel(ir_raw);
        trace!(len = ir.len(), red_dc, ir_dc, "Window conditioned");

        ConditionedWindow {
            red,
            ir,
            red_dc,
            ir_dc,
        }
    }

    fn condition_channel(&self, mut data: Vec<f64>) -> Vec<f64> {
        if self.smoothing_window > 1 {
            data = moving_average(&data, self.smoothing_window);
        }
        if let Some(band) = self.band_limit {
            data = band_limit(&data, band.highpass_alpha, band.lowpass_beta);
        }
        if self.remove_baseline {
            let dc = mean(&data);
            data.iter_mut().for_each(|v| *v -= dc);
        }
        data
    }
}

fn to_f64(values: &[u32]) -> Vec<f64> {
    values.iter().map(|&v| f64::from(v)).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Causal moving average: output `i` is the mean of inputs `max(0, i-w+1) ..= i`.
pub fn moving_average(input: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..input.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &input[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Two-stage recursive band limiter.
///
/// High-pass: `hp[0] = x[0]`, `hp[i] = a*hp[i-1] + a*(x[i] - x[i-1])`.
/// Low-pass: `lp[0] = hp[0]`, `lp[i] = b*hp[i] + (1-b)*lp[i-1]`.
pub fn band_limit(input: &[f64], alpha: f64, beta: f64) -> Vec<f64> {
    let Some(&first) = input.first() else {
        return Vec::new();
    };

    let mut output = Vec::with_capacity(input.len());
    let mut hp = first;
    let mut lp = first;
    output.push(lp);

    for pair in input.windows(2) {
        hp = alpha * hp + alpha * (pair[1] - pair[0]);
        lp = beta * hp + (1.0 - beta) * lp;
        output.push(lp);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn moving_average_uses_shorter_window_at_start() {
        let out = moving_average(&[2.0, 4.0, 6.0, 8.0, 10.0], 3);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn moving_average_of_one_is_identity() {
        let input = [5.0, 1.0, 3.0];
        assert_eq!(moving_average(&input, 1), input.to_vec());
    }

    #[test]
    fn band_limit_is_seeded_with_first_sample() {
        let out = band_limit(&[100.0, 100.0, 100.0], 0.95, 0.1);
        assert!(approx(out[0], 100.0));
        // hp decays geometrically on a flat input, lp follows it
        assert!(approx(out[1], 0.1 * 95.0 + 0.9 * 100.0));
        assert!(out[2] < out[1]);
    }

    #[test]
    fn band_limit_reads_original_differences() {
        // A step: the high-pass sees the raw jump, not an already-filtered value
        let out = band_limit(&[0.0, 10.0], 0.5, 1.0);
        assert!(approx(out[1], 5.0));
    }

    #[test]
    fn band_limit_handles_empty_and_single() {
        assert!(band_limit(&[], 0.95, 0.1).is_empty());
        assert_eq!(band_limit(&[7.0], 0.95, 0.1), vec![7.0]);
    }

    #[test]
    fn filter_keeps_raw_dc_and_is_deterministic() {
        let config = ConditioningConfig::default();
        let filter = ConditioningFilter::new(&config);
        let snapshot = WindowSnapshot {
            red: vec![50_000, 51_000, 49_000, 50_000],
            ir: vec![60_000, 62_000, 58_000, 60_000],
        };

        let a = filter.apply(&snapshot);
        let b = filter.apply(&snapshot);

        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(approx(a.red_dc(), 50_000.0));
        assert!(approx(a.ir_dc(), 60_000.0));
    }

    #[test]
    fn disabled_stages_pass_data_through() {
        let config = ConditioningConfig {
            smoothing_window: 0,
            band_limit: BandLimitConfig {
                enabled: false,
                ..Default::default()
            },
            remove_baseline: false,
        };
        let filter = ConditioningFilter::new(&config);
        let snapshot = WindowSnapshot {
            red: vec![1, 2, 3],
            ir: vec![4, 5, 6],
        };
        let out = filter.apply(&snapshot);
        assert_eq!(out.red(), &[1.0, 2.0, 3.0]);
        assert_eq!(out.ir(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn baseline_removal_centres_the_output() {
        let config = ConditioningConfig {
            smoothing_window: 1,
            band_limit: BandLimitConfig {
                enabled: false,
                ..Default::default()
            },
            remove_baseline: true,
        };
        let out = ConditioningFilter::new(&config).apply(&WindowSnapshot {
            red: vec![10, 20, 30],
            ir: vec![100, 100, 100],
        });
        assert_eq!(out.red(), &[-10.0, 0.0, 10.0]);
        assert!(out.ir().iter().all(|v| approx(*v, 0.0)));
        assert!(approx(out.red_dc(), 20.0));
    }
}
