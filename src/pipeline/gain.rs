//! Closed-loop LED drive control.
//!
//! The drive level is the only actuator the device has for a weak or saturated
//! signal. Each cycle the controller looks at the same window statistics the quality
//! gate uses: on saturation it backs off, on a weak signal it ramps up, otherwise it
//! holds. Saturation wins when both conditions are present.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{GainConfig, QualityConfig};
use crate::pipeline::quality::WindowStats;
use crate::sensor::DriveLevel;

/// Why the controller moved (or did not move) the drive level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GainAction {
    /// Signal in range
    Hold,
    /// Saturation or overdrive detected
    Decrease,
    /// Weak signal or poor contact detected
    Increase,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GainDecision {
    /// Branch taken
    pub action: GainAction,
    /// Drive level before the decision
    pub previous: DriveLevel,
    /// Drive level to command, always within bounds
    pub level: DriveLevel,
}

/// LED drive controller; sole owner of the drive level.
#[derive(Debug, Clone)]
pub struct GainController {
    gain: GainConfig,
    limits: QualityConfig,
    level: DriveLevel,
}

impl GainController {
    /// Create a controller at the configured initial level.
    pub fn new(gain: GainConfig, limits: QualityConfig) -> Self {
        let level = gain.initial.clamp(gain.min, gain.max);
        Self {
            gain,
            limits,
            level,
        }
    }

    /// Current drive level.
    pub fn level(&self) -> DriveLevel {
        self.level
    }

    /// Return to the initial level.
    pub fn reset(&mut self) {
        self.level = self.gain.initial.clamp(self.gain.min, self.gain.max);
    }

    /// Pure decision for `current` given this cycle's statistics.
    pub fn evaluate(&self, stats: &WindowStats, current: DriveLevel) -> GainDecision {
        let saturated = stats.ir.is_saturated(&self.limits.ir)
            || stats.red.is_saturated(&self.limits.red);
        let weak = stats.ir.is_weak(&self.limits.ir) || stats.red.is_weak(&self.limits.red);

        let (action, target) = if saturated {
            (GainAction::Decrease, current.saturating_sub(self.gain.step_down))
        } else if weak {
            (GainAction::Increase, current.saturating_add(self.gain.step_up))
        } else {
            (GainAction::Hold, current)
        };

        GainDecision {
            action,
            previous: current,
            level: target.clamp(self.gain.min, self.gain.max),
        }
    }

    /// Evaluate against the owned level and store the result.
    pub fn apply(&mut self, stats: &WindowStats) -> GainDecision {
        let decision = self.evaluate(stats, self.level);
        match decision.action {
            GainAction::Decrease if decision.level != decision.previous => {
                info!(
                    from = decision.previous,
                    to = decision.level,
                    "Saturation: LED drive lowered"
                );
            }
            GainAction::Increase if decision.level != decision.previous => {
                info!(
                    from = decision.previous,
                    to = decision.level,
                    "Weak signal: LED drive raised"
                );
            }
            _ => debug!(level = decision.level, action = ?decision.action, "LED drive unchanged"),
        }
        self.level = decision.level;
        decision
    }
}
