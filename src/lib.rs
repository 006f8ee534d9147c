//! # Biowatch Core Library
//!
//! This crate is the measurement core of a wrist-worn optical biometric monitor. It
//! turns a noisy two-wavelength (Red/IR) light-intensity stream into a heart-rate and
//! oxygen-saturation reading at a bounded update rate, adapting the LED drive as it
//! goes and refusing to publish when the signal cannot be trusted.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered configuration (defaults, TOML file, `BIOWATCH_` environment)
//!   loaded with `figment`. See `config::MonitorConfig`.
//! - **`error`**: The `MonitorError` enum and the per-call `AcquisitionError`.
//! - **`metrics`**: `PublishedMetrics` and its `tokio::sync::watch` publisher, the only
//!   state visible outside the control task.
//! - **`pipeline`**: Rolling window, conditioning filters, gain control, quality gate,
//!   estimator seam, HR smoother and the per-cycle state machine tying them together.
//! - **`sensor`**: The `SampleSource` trait standing in for the optical front-end
//!   driver, with a synthetic mock, a scripted test source and a CSV replay source.
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use biowatch_core::config::MonitorConfig;
//! use biowatch_core::pipeline::{PeakIntervalEstimator, PipelineController};
//! use biowatch_core::sensor::mock::{MockPpgSensor, MockSensorConfig};
//!
//! let config = MonitorConfig::load()?;
//! let estimator = PeakIntervalEstimator::new(config.acquisition.sample_rate_hz);
//! let sensor = MockPpgSensor::new(MockSensorConfig::default());
//! let mut controller = PipelineController::new(config, sensor, estimator)?;
//!
//! loop {
//!     let report = controller.run_cycle().await;
//!     println!("{} {}", report.state, report.metrics);
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod sensor;
pub mod tracing_setup;
