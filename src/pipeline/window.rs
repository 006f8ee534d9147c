//! Rolling dual-channel sample window.
//!
//! [`WindowBuffer`] owns the last N samples. Storage is a fixed arena indexed
//! circularly, so evicting the oldest sample and appending a new one is O(1) while the
//! externally observed order is the same as shifting an array left.
//!
//! Every acquisition call bounds each sample wait with the per-sample timeout, so a
//! call asking for `k` samples returns within `timeout * k`.

use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::AcquisitionError;
use crate::sensor::{Sample, SampleSource};

/// Owned per-channel copy of the window in arrival order (oldest first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Red channel
    pub red: Vec<u32>,
    /// Infrared channel
    pub ir: Vec<u32>,
}

impl WindowSnapshot {
    /// Build a snapshot from samples in arrival order.
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let (red, ir) = samples.into_iter().map(|s| (s.red, s.ir)).unzip();
        Self { red, ir }
    }

    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.ir.len()
    }

    /// Whether the snapshot holds no samples.
    pub fn is_empty(&self) -> bool {
        self.ir.is_empty()
    }
}

/// Fixed-length rolling window over the sensor stream.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    slots: Vec<Sample>,
    /// Index of the oldest sample once full
    head: usize,
    capacity: usize,
    sample_timeout: Duration,
}

impl WindowBuffer {
    /// Create an empty window of `capacity` samples.
    pub fn new(capacity: usize, sample_timeout: Duration) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
            capacity,
            sample_timeout,
        }
    }

    /// Configured window length N.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples currently held: 0 before the first fill, N afterwards.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been committed yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the window holds N samples.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.slots.len() == self.capacity
    }

    /// Per-sample deadline.
    pub fn sample_timeout(&self) -> Duration {
        self.sample_timeout
    }

    /// Longest time an acquisition call for `samples` samples can take.
    pub fn acquisition_budget(&self, samples: usize) -> Duration {
        self.sample_timeout
            .saturating_mul(u32::try_from(samples).unwrap_or(u32::MAX))
    }

    /// Drop all samples. The next acquisition must be a full fill.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Samples in arrival order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// Most recently appended sample.
    pub fn latest(&self) -> Option<Sample> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = (self.head + self.slots.len() - 1) % self.slots.len();
        Some(self.slots[idx])
    }

    /// Read-only per-channel copy of the window.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot::from_samples(self.iter())
    }

    /// Read N samples and replace the window with them.
    ///
    /// All-or-nothing: samples are staged and only committed once all N arrived. On
    /// failure the previous contents (possibly empty) are untouched.
    pub async fn fill_initial<S>(&mut self, source: &mut S) -> Result<(), AcquisitionError>
    where
        S: SampleSource + ?Sized,
    {
        let requested = self.capacity;
        let mut staged = Vec::with_capacity(requested);

        for collected in 0..requested {
            let sample = self.read_one(source, collected, requested).await?;
            staged.push(sample);
            if collected % 25 == 0 {
                trace!(collected, requested, "Filling window");
            }
        }

        self.slots = staged;
        self.head = 0;
        debug!(samples = requested, "Window filled");
        Ok(())
    }

    /// Evict the `k` oldest samples and append `k` new ones, one at a time.
    ///
    /// Stops at the first failed read. Samples appended before the failure stay in the
    /// window, which keeps exactly N samples throughout.
    pub async fn slide_and_append<S>(
        &mut self,
        source: &mut S,
        k: usize,
    ) -> Result<(), AcquisitionError>
    where
        S: SampleSource + ?Sized,
    {
        if !self.is_full() {
            return Err(AcquisitionError::NotFilled);
        }

        for collected in 0..k {
            let sample = self.read_one(source, collected, k).await?;
            self.push_evicting(sample);
        }
        trace!(appended = k, "Window advanced");
        Ok(())
    }

    fn push_evicting(&mut self, sample: Sample) {
        self.slots[self.head] = sample;
        self.head = (self.head + 1) % self.capacity;
    }

    async fn read_one<S>(
        &self,
        source: &mut S,
        collected: usize,
        requested: usize,
    ) -> Result<Sample, AcquisitionError>
    where
        S: SampleSource + ?Sized,
    {
        match timeout(self.sample_timeout, source.read_sample()).await {
            Ok(Ok(sample)) => Ok(sample),
            Ok(Err(e)) => {
                warn!(collected, requested, error = %e, "Sensor read failed");
                Err(AcquisitionError::Source {
                    collected,
                    requested,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(collected, requested, timeout = ?self.sample_timeout, "Sample timeout");
                Err(AcquisitionError::SampleTimeout {
                    collected,
                    requested,
                    timeout: self.sample_timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::mock::{ScriptStep, ScriptedSensor};

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn ramp(range: std::ops::Range<u32>) -> Vec<Sample> {
        range.map(|i| Sample::new(i, 1000 + i)).collect()
    }

    #[tokio::test]
    async fn fill_holds_n_samples_in_arrival_order() {
        let mut sensor = ScriptedSensor::from_samples(ramp(0..5));
        let mut window = WindowBuffer::new(5, TIMEOUT);

        window.fill_initial(&mut sensor).await.unwrap();

        assert!(window.is_full());
        let snap = window.snapshot();
        assert_eq!(snap.red, vec![0, 1, 2, 3, 4]);
        assert_eq!(snap.ir, vec![1000, 1001, 1002, 1003, 1004]);
        assert_eq!(window.latest(), Some(Sample::new(4, 1004)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fill_commits_nothing() {
        let mut steps: Vec<ScriptStep> = ramp(0..3).into_iter().map(ScriptStep::Sample).collect();
        steps.push(ScriptStep::Stall);
        let mut sensor = ScriptedSensor::new(steps);
        let mut window = WindowBuffer::new(5, TIMEOUT);

        let err = window.fill_initial(&mut sensor).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.collected(), 3);
        assert!(window.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refill_keeps_previous_window() {
        let mut steps: Vec<ScriptStep> = ramp(0..4).into_iter().map(ScriptStep::Sample).collect();
        steps.push(ScriptStep::Sample(Sample::new(99, 99)));
        steps.push(ScriptStep::Fault);
        let mut sensor = ScriptedSensor::new(steps);
        let mut window = WindowBuffer::new(4, TIMEOUT);

        window.fill_initial(&mut sensor).await.unwrap();
        assert!(window.fill_initial(&mut sensor).await.is_err());
        assert_eq!(window.snapshot().red, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn slide_evicts_exactly_k_oldest() {
        let mut sensor = ScriptedSensor::from_samples(ramp(0..8));
        let mut window = WindowBuffer::new(5, TIMEOUT);
        window.fill_initial(&mut sensor).await.unwrap();

        window.slide_and_append(&mut sensor, 3).await.unwrap();

        assert_eq!(window.len(), 5);
        assert_eq!(window.snapshot().red, vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn repeated_slides_wrap_the_arena() {
        let mut sensor = ScriptedSensor::from_samples(ramp(0..20));
        let mut window = WindowBuffer::new(4, TIMEOUT);
        window.fill_initial(&mut sensor).await.unwrap();

        for _ in 0..5 {
            window.slide_and_append(&mut sensor, 3).await.unwrap();
        }

        assert_eq!(window.snapshot().red, vec![15, 16, 17, 18]);
        assert_eq!(window.latest(), Some(Sample::new(18, 1018)));
    }

    #[tokio::test(start_paused = true)]
    async fn slide_timeout_keeps_partial_progress_and_length() {
        let mut steps: Vec<ScriptStep> = ramp(0..6).into_iter().map(ScriptStep::Sample).collect();
        steps.push(ScriptStep::Stall);
        let mut sensor = ScriptedSensor::new(steps);
        let mut window = WindowBuffer::new(4, TIMEOUT);
        window.fill_initial(&mut sensor).await.unwrap();

        let err = window.slide_and_append(&mut sensor, 3).await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.collected(), 2);
        assert_eq!(window.len(), 4);
        assert_eq!(window.snapshot().red, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn slide_before_fill_is_rejected() {
        let mut sensor = ScriptedSensor::from_samples(ramp(0..3));
        let mut window = WindowBuffer::new(4, TIMEOUT);
        assert!(matches!(
            window.slide_and_append(&mut sensor, 2).await,
            Err(AcquisitionError::NotFilled)
        ));
        assert_eq!(sensor.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquisition_returns_within_budget() {
        let mut sensor = ScriptedSensor::new([ScriptStep::Stall]);
        let mut window = WindowBuffer::new(10, TIMEOUT);

        let start = tokio::time::Instant::now();
        assert!(window.fill_initial(&mut sensor).await.is_err());
        assert!(start.elapsed() <= window.acquisition_budget(10));
        assert_eq!(window.acquisition_budget(12), Duration::from_millis(1200));
    }

    #[test]
    fn clear_empties_the_window() {
        let mut window = WindowBuffer::new(3, TIMEOUT);
        window.slots = ramp(0..3);
        window.head = 1;
        window.clear();
        assert!(window.is_empty());
        assert_eq!(window.latest(), None);
    }
}
