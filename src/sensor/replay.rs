//! CSV capture replay.
//!
//! Plays back a recorded capture with one `red,ir` row per sample (header required) as
//! if it came from the front-end. Drive level changes cannot alter a recording, so they
//! are only logged. When the capture runs out the sensor either loops or stalls, in
//! which case the pipeline sees ordinary sample timeouts.
//!
//! ```text
//! red,ir
//! 50211,61032
//! 50190,60987
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use super::{DriveLevel, Sample, SampleSource};
use crate::error::{AppResult, MonitorError};

/// Sensor backed by a recorded capture.
pub struct CsvReplaySensor {
    samples: Vec<Sample>,
    position: usize,
    looping: bool,
    period: Option<Duration>,
    drive: DriveLevel,
}

impl CsvReplaySensor {
    /// Load every row of the file up front.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let samples = reader
            .deserialize::<Sample>()
            .collect::<Result<Vec<_>, _>>()?;
        if samples.is_empty() {
            return Err(MonitorError::Replay(format!(
                "{} contains no samples",
                path.as_ref().display()
            )));
        }
        info!(
            path = %path.as_ref().display(),
            samples = samples.len(),
            "Loaded capture for replay"
        );
        Ok(Self::from_samples(samples))
    }

    /// Replay samples already in memory.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            position: 0,
            looping: false,
            period: None,
            drive: 0,
        }
    }

    /// Start over from the first row once the capture ends.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Deliver samples at the original rate instead of as fast as requested.
    pub fn paced(mut self, sample_rate_hz: f64) -> Self {
        self.period =
            (sample_rate_hz > 0.0).then(|| Duration::from_secs_f64(1.0 / sample_rate_hz));
        self
    }

    /// Number of samples in the capture.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the capture is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether a non-looping replay has delivered every row.
    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.position >= self.samples.len()
    }
}

#[async_trait]
impl SampleSource for CsvReplaySensor {
    async fn read_sample(&mut self) -> Result<Sample> {
        if self.position >= self.samples.len() {
            if !self.looping || self.samples.is_empty() {
                return std::future::pending().await;
            }
            self.position = 0;
        }
        if let Some(period) = self.period {
            sleep(period).await;
        }
        let sample = self.samples[self.position];
        self.position += 1;
        Ok(sample)
    }

    async fn set_drive_level(&mut self, level: DriveLevel) -> Result<()> {
        if level != self.drive {
            debug!(level, "Replay ignores drive level change");
            self.drive = level;
        }
        Ok(())
    }

    async fn soft_reset(&mut self) -> Result<()> {
        debug!("Replay soft reset is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn replays_rows_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "red,ir\n100,200\n110,210").unwrap();

        let mut sensor = CsvReplaySensor::open(file.path()).unwrap();
        assert_eq!(sensor.len(), 2);
        assert_eq!(sensor.read_sample().await.unwrap(), Sample::new(100, 200));
        assert_eq!(sensor.read_sample().await.unwrap(), Sample::new(110, 210));
        assert!(sensor.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_replay_stalls() {
        let mut sensor = CsvReplaySensor::from_samples(vec![Sample::new(1, 1)]);
        sensor.read_sample().await.unwrap();
        let next = tokio::time::timeout(Duration::from_millis(50), sensor.read_sample()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn looping_replay_wraps() {
        let mut sensor =
            CsvReplaySensor::from_samples(vec![Sample::new(1, 1), Sample::new(2, 2)]).looping(true);
        for expected in [1, 2, 1, 2] {
            assert_eq!(sensor.read_sample().await.unwrap().ir, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paced_replay_keeps_the_sample_rate() {
        let mut sensor =
            CsvReplaySensor::from_samples(vec![Sample::new(1, 1), Sample::new(2, 2)]).paced(25.0);
        let started = tokio::time::Instant::now();
        sensor.read_sample().await.unwrap();
        sensor.read_sample().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(90), "{elapsed:?}");
    }

    #[test]
    fn empty_capture_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "red,ir").unwrap();
        assert!(matches!(
            CsvReplaySensor::open(file.path()),
            Err(MonitorError::Replay(_))
        ));
    }
}
