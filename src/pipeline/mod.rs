//! Measurement Pipeline
//!
//! Turns the raw Red/IR sample stream into published HR and SpO2 readings.
//!
//! # Data Flow
//!
//! ```text
//! SampleSource -> WindowBuffer -> ConditioningFilter -> QualityGate -> Estimator -> ResultSmoother
//!                                      |                    |
//!                                      +--> WindowStats ----+--> GainController -> SampleSource
//! ```
//!
//! Leaves first: [`window`], [`conditioning`], [`gain`], [`quality`], [`smoother`],
//! [`estimator`]; [`controller`] composes them into the per-cycle state machine.

pub mod conditioning;
pub mod controller;
pub mod estimator;
pub mod gain;
pub mod quality;
pub mod smoother;
pub mod window;

pub use conditioning::{ConditionedWindow, ConditioningFilter};
pub use controller::{CycleReport, CycleTimings, PipelineController, PipelineState};
pub use estimator::{Estimator, PeakIntervalEstimator, RawEstimate, HR_RANGE, SPO2_RANGE};
pub use gain::{GainAction, GainController, GainDecision};
pub use quality::{ChannelStats, QualityGate, QualityVerdict, WindowStats};
pub use smoother::{HrUpdate, ResultSmoother};
pub use window::{WindowBuffer, WindowSnapshot};
