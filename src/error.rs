//! Custom error types for the measurement core.
//!
//! This module defines the primary error type, `MonitorError`, for the crate, plus two
//! narrower per-cycle errors: `AcquisitionError` returned by every window fill/slide
//! call and `CommandError` for drive-level and soft-reset commands. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle the
//! different kinds of failures, from configuration issues to sensor timeouts.
//!
//! ## Error Hierarchy
//!
//! `MonitorError` consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically parse or type errors in the
//!   TOML file or environment overrides.
//! - **`Configuration`**: Semantic errors caught by `MonitorConfig::validate`, such as a
//!   slide length larger than the window.
//! - **`Acquisition`**: A fill/slide call failed. Never fatal to the pipeline; the
//!   controller decides whether to retry or escalate to a sensor soft reset.
//! - **`Replay`**: A recorded capture could not be read.
//! - **`Csv`**: Wraps `csv::Error` from the replay source.
//!
//! A `CommandError` (a rejected drive level, a failed reset, or either one exceeding
//! the per-sample deadline) is logged and carried in the cycle report. It never aborts
//! a cycle.
//!
//! Signal-quality failures, envelope rejections and HR jump rejections are *not*
//! errors: they are ordinary per-cycle outcomes reported in the published metrics.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Replay error: {0}")]
    Replay(String),

    #[cfg(feature = "replay_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Failure of a single fill or slide call.
///
/// `collected` counts the samples that were read successfully before the failure.
/// For a fill none of them are committed; for a slide they are already part of the
/// window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("sample timeout after {collected}/{requested} samples (limit {timeout:?} per sample)")]
    SampleTimeout {
        collected: usize,
        requested: usize,
        timeout: Duration,
    },

    #[error("sensor read failed after {collected}/{requested} samples: {message}")]
    Source {
        collected: usize,
        requested: usize,
        message: String,
    },

    #[error("window has not been filled yet")]
    NotFilled,
}

/// Failure of a command sent to the sensor outside acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{command} timed out after {timeout:?}")]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },

    #[error("{command} rejected: {message}")]
    Rejected {
        command: &'static str,
        message: String,
    },
}

impl CommandError {
    /// Name of the command that failed.
    pub fn command(&self) -> &'static str {
        match self {
            CommandError::Timeout { command, .. } | CommandError::Rejected { command, .. } => {
                command
            }
        }
    }
}

impl AcquisitionError {
    /// Number of samples read before the call failed.
    pub fn collected(&self) -> usize {
        match self {
            AcquisitionError::SampleTimeout { collected, .. }
            | AcquisitionError::Source { collected, .. } => *collected,
            AcquisitionError::NotFilled => 0,
        }
    }

    /// Whether the failure was the per-sample deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AcquisitionError::SampleTimeout { .. })
    }
}
