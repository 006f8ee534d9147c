//! Published Metrics
//!
//! The only state shared outside the control task. Each cycle overwrites the whole
//! record and broadcasts it through `tokio::sync::watch`, so display and logging
//! collaborators always see the latest complete reading and never a half-updated one.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut rx = controller.subscribe();
//! tokio::spawn(async move {
//!     while rx.changed().await.is_ok() {
//!         let metrics = rx.borrow_and_update().clone();
//!         println!("{metrics}");
//!     }
//! });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Reading exposed to display and logging consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedMetrics {
    /// Smoothed heart rate, `None` when there is no reading
    pub heart_rate_bpm: Option<i32>,
    /// Oxygen saturation, `None` when there is no reading
    pub spo2_percent: Option<i32>,
    /// Heart rate was produced by this cycle
    pub heart_rate_valid: bool,
    /// SpO2 was produced by this cycle
    pub spo2_valid: bool,
    /// Cycle that produced this record
    pub cycle: u64,
    /// Publication time
    pub updated_at: DateTime<Utc>,
}

impl PublishedMetrics {
    /// Record with no reading for `cycle`.
    pub fn empty(cycle: u64) -> Self {
        Self {
            heart_rate_bpm: None,
            spo2_percent: None,
            heart_rate_valid: false,
            spo2_valid: false,
            cycle,
            updated_at: Utc::now(),
        }
    }

    /// Whether either metric is valid.
    pub fn has_reading(&self) -> bool {
        self.heart_rate_valid || self.spo2_valid
    }
}

impl fmt::Display for PublishedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: Option<i32>, valid: bool| match (value, valid) {
            (Some(v), true) => v.to_string(),
            (Some(v), false) => format!("({v})"),
            (None, _) => "--".to_string(),
        };
        write!(
            f,
            "#{:<5} HR {:>5} bpm  SpO2 {:>4} %",
            self.cycle,
            show(self.heart_rate_bpm, self.heart_rate_valid),
            show(self.spo2_percent, self.spo2_valid)
        )
    }
}

/// Single-writer broadcast of [`PublishedMetrics`].
#[derive(Debug)]
pub struct MetricsPublisher {
    sender: watch::Sender<PublishedMetrics>,
}

impl Default for MetricsPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsPublisher {
    /// Create a publisher holding an empty record for cycle 0.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PublishedMetrics::empty(0));
        Self { sender }
    }

    /// Replace the published record and notify subscribers.
    pub fn publish(&self, metrics: PublishedMetrics) {
        self.sender.send_replace(metrics);
    }

    /// Latest published record.
    pub fn current(&self) -> PublishedMetrics {
        self.sender.borrow().clone()
    }

    /// New subscriber; it sees the current record immediately.
    pub fn subscribe(&self) -> watch::Receiver<PublishedMetrics> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
