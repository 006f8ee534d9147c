//! Signal-quality and finger-presence gate with hysteresis.
//!
//! A window is *acceptable* when both channels sit between their floor and saturation
//! ceiling and show enough pulsatile amplitude. It is *trusted* only after
//! `required_consecutive` acceptable windows in a row, which keeps the published
//! reading from flickering while the wearer settles.

use serde::Serialize;
use tracing::debug;

use crate::config::{ChannelThresholds, QualityConfig};
use crate::pipeline::window::WindowSnapshot;

/// Min/max and pulsatile range of one channel over the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Smallest raw value
    pub min: u32,
    /// Largest raw value
    pub max: u32,
    /// `max - min`
    pub pulsatile: u32,
}

impl ChannelStats {
    /// Compute statistics over one channel. An empty channel yields all zeros.
    pub fn from_values(values: &[u32]) -> Self {
        let mut iter = values.iter().copied();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Self {
            min,
            max,
            pulsatile: max - min,
        }
    }

    /// Max above the saturation ceiling, or amplitude above the overdrive limit.
    pub fn is_saturated(&self, limits: &ChannelThresholds) -> bool {
        self.max > limits.ceiling
            || limits
                .max_pulsatile
                .is_some_and(|limit| self.pulsatile > limit)
    }

    /// Too little amplitude or too little light reaching the detector.
    pub fn is_weak(&self, limits: &ChannelThresholds) -> bool {
        self.pulsatile < limits.min_pulsatile || self.min < limits.floor
    }

    /// Within all limits for a usable measurement.
    pub fn is_acceptable(&self, limits: &ChannelThresholds) -> bool {
        self.max < limits.ceiling
            && self.min >= limits.floor
            && self.pulsatile >= limits.min_pulsatile
    }
}

/// Statistics for both channels, computed once per cycle and shared with the gain
/// controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowStats {
    /// Red channel
    pub red: ChannelStats,
    /// Infrared channel
    pub ir: ChannelStats,
}

impl WindowStats {
    /// Compute statistics for a snapshot.
    pub fn from_snapshot(snapshot: &WindowSnapshot) -> Self {
        Self {
            red: ChannelStats::from_values(&snapshot.red),
            ir: ChannelStats::from_values(&snapshot.ir),
        }
    }
}

/// Outcome of assessing one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityVerdict {
    /// Statistics the decision was based on
    pub stats: WindowStats,
    /// This window alone meets every threshold
    pub acceptable: bool,
    /// Enough consecutive acceptable windows to run the estimator
    pub trusted: bool,
    /// Current run of acceptable windows
    pub consecutive: u32,
}

/// Hysteresis gate over window quality.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
    consecutive: u32,
}

impl QualityGate {
    /// Create a gate with an empty run.
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            consecutive: 0,
        }
    }

    /// Current run of acceptable windows.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Forget the current run.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Assess a raw window and update the run counter.
    pub fn assess(&mut self, snapshot: &WindowSnapshot) -> QualityVerdict {
        let stats = WindowStats::from_snapshot(snapshot);
        self.assess_stats(stats)
    }

    /// Same as [`assess`](Self::assess) for precomputed statistics.
    pub fn assess_stats(&mut self, stats: WindowStats) -> QualityVerdict {
        let acceptable = stats.ir.is_acceptable(&self.config.ir)
            && stats.red.is_acceptable(&self.config.red);

        self.consecutive = if acceptable {
            self.consecutive.saturating_add(1)
        } else {
            0
        };
        let trusted = self.consecutive >= self.config.required_consecutive;

        debug!(
            ir_min = stats.ir.min,
            ir_max = stats.ir.max,
            ir_pulse = stats.ir.pulsatile,
            red_min = stats.red.min,
            red_max = stats.red.max,
            red_pulse = stats.red.pulsatile,
            acceptable,
            consecutive = self.consecutive,
            trusted,
            "Signal quality assessed"
        );

        QualityVerdict {
            stats,
            acceptable,
            trusted,
            consecutive: self.consecutive,
        }
    }
}
