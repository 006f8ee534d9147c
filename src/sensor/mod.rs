//! Sensor Collaborator Interface
//!
//! The measurement core never talks to a bus directly. It drives an implementation of
//! [`SampleSource`], which stands in for the optical front-end driver: it yields
//! `(red, ir)` samples, accepts LED drive levels and can perform a soft reset.
//!
//! # Contract
//! - `read_sample` may wait for the next sample; the core bounds every wait with the
//!   configured per-sample timeout, so an implementation may simply never resolve when
//!   the FIFO is empty
//! - `set_drive_level` is called once per cycle with the gain chosen for that cycle
//! - `soft_reset` restores the front-end to its power-on configuration; the core
//!   reapplies the drive level afterwards
//!
//! Available implementations:
//! - [`mock::MockPpgSensor`] - synthetic pulse waveform reacting to the drive level
//! - [`mock::ScriptedSensor`] - deterministic sample script for tests
//! - [`replay::CsvReplaySensor`] - replays a recorded capture (feature `replay_csv`)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod mock;
#[cfg(feature = "replay_csv")]
pub mod replay;

/// One dual-wavelength reading, in raw ADC counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Red LED channel
    pub red: u32,
    /// Infrared LED channel
    pub ir: u32,
}

impl Sample {
    /// Create a sample from raw channel counts.
    pub const fn new(red: u32, ir: u32) -> Self {
        Self { red, ir }
    }
}

/// LED drive level as understood by the front-end (0 = off).
pub type DriveLevel = u16;

/// Capability: dual-wavelength optical sampling with adjustable LED drive.
#[async_trait]
pub trait SampleSource: Send {
    /// Wait for and return the next sample.
    ///
    /// # Returns
    /// - Ok(sample) when the front-end delivered one
    /// - Err on a bus or device fault
    async fn read_sample(&mut self) -> Result<Sample>;

    /// Apply a new LED drive level to both channels.
    async fn set_drive_level(&mut self, level: DriveLevel) -> Result<()>;

    /// Reset the front-end and reload its sampling configuration.
    async fn soft_reset(&mut self) -> Result<()>;
}

#[async_trait]
impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    async fn read_sample(&mut self) -> Result<Sample> {
        (**self).read_sample().await
    }

    async fn set_drive_level(&mut self, level: DriveLevel) -> Result<()> {
        (**self).set_drive_level(level).await
    }

    async fn soft_reset(&mut self) -> Result<()> {
        (**self).soft_reset().await
    }
}
