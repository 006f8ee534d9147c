//! HR outlier rejection and averaging.
//!
//! Accepted heart-rate candidates go into a bounded history and the published value is
//! the mean of whatever the history currently holds. Right after a reset the mean is
//! taken over fewer than `history_len` values; that is intended.
//!
//! A candidate further than `max_jump` bpm from the previously accepted candidate is
//! rejected and the last published value is kept.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::SmoothingConfig;

/// Outcome of offering one HR candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrUpdate {
    /// Candidate went into the history
    pub accepted: bool,
    /// Value to show: the new mean, or the last trusted value after a rejection
    pub published: Option<i32>,
}

/// Bounded history of accepted heart rates.
#[derive(Debug, Clone)]
pub struct ResultSmoother {
    history: VecDeque<i32>,
    capacity: usize,
    max_jump: i32,
    last_accepted: Option<i32>,
    last_published: Option<i32>,
}

impl ResultSmoother {
    /// Create an empty smoother.
    pub fn new(config: SmoothingConfig) -> Self {
        let capacity = config.history_len.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            max_jump: config.max_jump,
            last_accepted: None,
            last_published: None,
        }
    }

    /// Offer a candidate that already passed the physiological envelope.
    pub fn on_new_hr(&mut self, candidate: i32) -> HrUpdate {
        if let Some(previous) = self.last_accepted {
            if candidate.abs_diff(previous) > self.max_jump.unsigned_abs() {
                warn!(
                    candidate,
                    previous,
                    max_jump = self.max_jump,
                    "HR jump rejected, keeping previous reading"
                );
                return HrUpdate {
                    accepted: false,
                    published: self.last_published,
                };
            }
        }

        self.history.push_back(candidate);
        if self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.last_accepted = Some(candidate);

        let sum: i64 = self.history.iter().map(|&v| i64::from(v)).sum();
        let mean = (sum as f64 / self.history.len() as f64).round() as i32;
        self.last_published = Some(mean);
        debug!(candidate, mean, held = self.history.len(), "HR accepted");

        HrUpdate {
            accepted: true,
            published: Some(mean),
        }
    }

    /// Empty the history and forget the previous value.
    pub fn clear(&mut self) {
        self.history.clear();
        self.last_accepted = None;
        self.last_published = None;
    }

    /// Values currently held, oldest first.
    pub fn history(&self) -> impl Iterator<Item = i32> + '_ {
        self.history.iter().copied()
    }

    /// Last value published after an accepted candidate.
    pub fn last_published(&self) -> Option<i32> {
        self.last_published
    }
}
