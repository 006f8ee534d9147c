//! Mock Sensor Implementations
//!
//! Simulated optical front-ends for running the pipeline without hardware.
//! All waiting uses `tokio::time`, so tests can run with a paused clock.
//!
//! # Available Mocks
//!
//! - `MockPpgSensor` - synthetic pulse waveform whose DC level and pulsatile amplitude
//!   scale with the LED drive level, with seeded noise
//! - `ScriptedSensor` - replays an exact list of samples and stalls, records every
//!   drive level and reset

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::{DriveLevel, Sample, SampleSource};

// =============================================================================
// MockPpgSensor - Synthetic Pulse Waveform
// =============================================================================

/// Parameters of the simulated wearer and front-end.
#[derive(Debug, Clone)]
pub struct MockSensorConfig {
    /// Output data rate in Hz
    pub sample_rate_hz: f64,
    /// Simulated heart rate in beats per minute
    pub heart_rate_bpm: f64,
    /// Simulated oxygen saturation, used to derive the red/IR modulation ratio
    pub spo2_percent: f64,
    /// IR counts per unit of drive level
    pub ir_counts_per_drive: f64,
    /// Red counts per unit of drive level
    pub red_counts_per_drive: f64,
    /// IR pulsatile amplitude as a fraction of its DC level (peak to peak)
    pub perfusion_index: f64,
    /// Peak-to-peak noise in counts
    pub noise_counts: f64,
    /// Sleep one sample period per read
    pub paced: bool,
    /// Noise seed
    pub seed: u64,
}

impl Default for MockSensorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 25.0,
            heart_rate_bpm: 72.0,
            spo2_percent: 97.0,
            ir_counts_per_drive: 1000.0,
            red_counts_per_drive: 850.0,
            perfusion_index: 0.15,
            noise_counts: 400.0,
            paced: false,
            seed: 0x5EED,
        }
    }
}

/// Mock optical front-end producing a PPG-like waveform.
///
/// With a finger present each channel is `dc + ac * pulse(t) + noise`, where both `dc`
/// and `ac` are proportional to the current drive level, so the gain controller sees a
/// realistic response. Without a finger only a small flat ambient level is returned.
///
/// # Example
///
/// ```rust,ignore
/// let mut sensor = MockPpgSensor::new(MockSensorConfig::default());
/// sensor.set_drive_level(60).await?;
/// let sample = sensor.read_sample().await?;
/// ```
pub struct MockPpgSensor {
    config: MockSensorConfig,
    rng: StdRng,
    drive: DriveLevel,
    sample_index: u64,
    finger_present: bool,
    stall_every: Option<u64>,
    reads: u64,
    resets: u32,
}

impl MockPpgSensor {
    /// Create a mock sensor with a finger on it.
    pub fn new(config: MockSensorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            drive: 60,
            sample_index: 0,
            finger_present: true,
            stall_every: None,
            reads: 0,
            resets: 0,
        }
    }

    /// Every `n`-th read never completes, exercising the timeout path.
    pub fn with_stall_every(mut self, n: u64) -> Self {
        self.stall_every = (n > 0).then_some(n);
        self
    }

    /// Place or remove the simulated finger.
    pub fn set_finger_present(&mut self, present: bool) {
        self.finger_present = present;
    }

    /// Current drive level.
    pub fn drive_level(&self) -> DriveLevel {
        self.drive
    }

    /// Number of soft resets performed.
    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Red/IR modulation ratio matching the configured saturation.
    ///
    /// Inverse of the linear calibration `SpO2 = 110 - 25 R`.
    fn modulation_ratio(&self) -> f64 {
        ((110.0 - self.config.spo2_percent) / 25.0).max(0.0)
    }

    fn synthesize(&mut self) -> Sample {
        let t = self.sample_index as f64 / self.config.sample_rate_hz;
        self.sample_index += 1;

        let ratio = self.modulation_ratio();
        let noise_span = self.config.noise_counts.max(0.0);
        let mut noise = || {
            if noise_span > 0.0 {
                self.rng.gen_range(-noise_span / 2.0..=noise_span / 2.0)
            } else {
                0.0
            }
        };

        if !self.finger_present {
            // Ambient leakage only
            let ir = 1_000.0 + noise() * 0.1;
            let red = 800.0 + noise() * 0.1;
            return Sample::new(red.max(0.0) as u32, ir.max(0.0) as u32);
        }

        let drive = f64::from(self.drive);
        let phase = (t * self.config.heart_rate_bpm / 60.0).fract();
        let pulse = pulse_shape(phase);

        let ir_dc = drive * self.config.ir_counts_per_drive;
        let ir_ac = ir_dc * self.config.perfusion_index;
        let red_dc = drive * self.config.red_counts_per_drive;
        let red_ac = red_dc * self.config.perfusion_index * ratio;

        // Blood volume peaks absorb light, so intensity dips with the pulse
        let ir = ir_dc - ir_ac * pulse + noise();
        let red = red_dc - red_ac * pulse + noise();

        // 18-bit ADC
        let clamp = |v: f64| v.clamp(0.0, 262_143.0) as u32;
        Sample::new(clamp(red), clamp(ir))
    }
}

/// Pulse shape in [0, 1] over one beat: a sharp systolic upstroke followed by a
/// slower decay with a small dicrotic bump.
pub(crate) fn pulse_shape(phase: f64) -> f64 {
    let systolic = (2.0 * PI * phase).sin().max(0.0).powf(1.5);
    let dicrotic = 0.25 * (4.0 * PI * phase - PI / 3.0).sin().max(0.0);
    ((systolic + dicrotic) / 1.25).clamp(0.0, 1.0)
}

#[async_trait]
impl SampleSource for MockPpgSensor {
    async fn read_sample(&mut self) -> Result<Sample> {
        self.reads += 1;
        if let Some(n) = self.stall_every {
            if self.reads % n == 0 {
                debug!(read = self.reads, "MockPpgSensor: stalling read");
                return std::future::pending().await;
            }
        }
        if self.config.paced {
            sleep(Duration::from_secs_f64(1.0 / self.config.sample_rate_hz)).await;
        }
        Ok(self.synthesize())
    }

    async fn set_drive_level(&mut self, level: DriveLevel) -> Result<()> {
        if level != self.drive {
            debug!(from = self.drive, to = level, "MockPpgSensor: drive level changed");
        }
        self.drive = level;
        Ok(())
    }

    async fn soft_reset(&mut self) -> Result<()> {
        self.resets += 1;
        self.sample_index = 0;
        debug!(resets = self.resets, "MockPpgSensor: soft reset");
        Ok(())
    }
}

// =============================================================================
// ScriptedSensor - Deterministic Test Source
// =============================================================================

/// One scripted read outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Deliver this sample
    Sample(Sample),
    /// Never deliver; the caller's timeout fires
    Stall,
    /// Report a device fault
    Fault,
}

/// Test source that plays back a fixed script, then repeats a fallback pattern.
///
/// Every drive level and reset is recorded for assertions.
pub struct ScriptedSensor {
    script: VecDeque<ScriptStep>,
    fallback: Vec<Sample>,
    fallback_pos: usize,
    drive_history: Vec<DriveLevel>,
    resets: u32,
    reads: usize,
}

impl ScriptedSensor {
    /// Create a sensor that plays `script` and then stalls forever.
    pub fn new(script: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: Vec::new(),
            fallback_pos: 0,
            drive_history: Vec::new(),
            resets: 0,
            reads: 0,
        }
    }

    /// Create a sensor that cycles through `pattern` indefinitely.
    pub fn repeating(pattern: Vec<Sample>) -> Self {
        Self::new(std::iter::empty()).with_fallback(pattern)
    }

    /// Create a sensor that delivers `samples` in order and then stalls.
    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self::new(samples.into_iter().map(ScriptStep::Sample))
    }

    /// Pattern to cycle once the script is exhausted.
    pub fn with_fallback(mut self, pattern: Vec<Sample>) -> Self {
        self.fallback = pattern;
        self.fallback_pos = 0;
        self
    }

    /// Every drive level applied so far, in order.
    pub fn drive_history(&self) -> &[DriveLevel] {
        &self.drive_history
    }

    /// Number of soft resets performed.
    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Number of read attempts, including stalls and faults.
    pub fn read_count(&self) -> usize {
        self.reads
    }

    fn next_step(&mut self) -> ScriptStep {
        if let Some(step) = self.script.pop_front() {
            return step;
        }
        if self.fallback.is_empty() {
            return ScriptStep::Stall;
        }
        let sample = self.fallback[self.fallback_pos % self.fallback.len()];
        self.fallback_pos += 1;
        ScriptStep::Sample(sample)
    }
}

#[async_trait]
impl SampleSource for ScriptedSensor {
    async fn read_sample(&mut self) -> Result<Sample> {
        self.reads += 1;
        match self.next_step() {
            ScriptStep::Sample(sample) => Ok(sample),
            ScriptStep::Stall => std::future::pending::<Result<Sample>>().await,
            ScriptStep::Fault => Err(anyhow!("scripted device fault")),
        }
    }

    async fn set_drive_level(&mut self, level: DriveLevel) -> Result<()> {
        self.drive_history.push(level);
        Ok(())
    }

    async fn soft_reset(&mut self) -> Result<()> {
        self.resets += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_signal_scales_with_drive() {
        let mut sensor = MockPpgSensor::new(MockSensorConfig {
            noise_counts: 0.0,
            ..Default::default()
        });

        sensor.set_drive_level(40).await.unwrap();
        let low: Vec<Sample> = futures_collect(&mut sensor, 50).await;
        sensor.set_drive_level(80).await.unwrap();
        let high: Vec<Sample> = futures_collect(&mut sensor, 50).await;

        let max_ir = |s: &[Sample]| s.iter().map(|x| x.ir).max().unwrap();
        assert!(max_ir(&high) > max_ir(&low));
        assert_eq!(max_ir(&low), 40_000);
    }

    #[tokio::test]
    async fn mock_without_finger_is_flat_and_dim() {
        let mut sensor = MockPpgSensor::new(MockSensorConfig::default());
        sensor.set_finger_present(false);
        let samples = futures_collect(&mut sensor, 25).await;
        assert!(samples.iter().all(|s| s.ir < 2_000 && s.red < 2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_stall_blocks_until_timeout() {
        let mut sensor = MockPpgSensor::new(MockSensorConfig::default()).with_stall_every(3);
        assert!(sensor.read_sample().await.is_ok());
        assert!(sensor.read_sample().await.is_ok());
        let third =
            tokio::time::timeout(Duration::from_millis(100), sensor.read_sample()).await;
        assert!(third.is_err());
    }

    #[tokio::test]
    async fn scripted_sensor_plays_script_then_fallback() {
        let mut sensor = ScriptedSensor::new([
            ScriptStep::Sample(Sample::new(1, 2)),
            ScriptStep::Fault,
        ])
        .with_fallback(vec![Sample::new(9, 9)]);

        assert_eq!(sensor.read_sample().await.unwrap(), Sample::new(1, 2));
        assert!(sensor.read_sample().await.is_err());
        assert_eq!(sensor.read_sample().await.unwrap(), Sample::new(9, 9));
        assert_eq!(sensor.read_count(), 3);

        sensor.set_drive_level(42).await.unwrap();
        sensor.soft_reset().await.unwrap();
        assert_eq!(sensor.drive_history(), &[42]);
        assert_eq!(sensor.reset_count(), 1);
    }

    async fn futures_collect(sensor: &mut MockPpgSensor, n: usize) -> Vec<Sample> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(sensor.read_sample().await.unwrap());
        }
        out
    }
}
