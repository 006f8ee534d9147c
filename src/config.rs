//! Configuration System using Figment
//!
//! Strongly-typed configuration for the measurement core. Everything here is fixed at
//! deploy time. Configuration is layered:
//! 1. Built-in defaults (the tuned firmware values)
//! 2. `config/biowatch.toml` (or any file passed to [`MonitorConfig::load_from`])
//! 3. Environment variables prefixed with `BIOWATCH_`, using `__` between sections
//!
//! # Example
//! ```no_run
//! use biowatch_core::config::MonitorConfig;
//!
//! let config = MonitorConfig::load()?;
//! config.validate()?;
//! println!("Window: {} samples", config.acquisition.window_len);
//! # Ok::<(), biowatch_core::error::MonitorError>(())
//! ```
//!
//! Environment example: `BIOWATCH_SMOOTHING__MAX_JUMP=15`.

use crate::error::{AppResult, MonitorError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/biowatch.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sample acquisition and window geometry
    pub acquisition: AcquisitionConfig,
    /// Conditioning filter stages
    pub conditioning: ConditioningConfig,
    /// LED drive control
    pub gain: GainConfig,
    /// Signal quality thresholds and hysteresis
    pub quality: QualityConfig,
    /// HR outlier rejection and averaging
    pub smoothing: SmoothingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Pause between measurement cycles in milliseconds
    pub update_delay_ms: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "biowatch".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            update_delay_ms: 200,
        }
    }
}

impl ApplicationConfig {
    /// Pause between cycles.
    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms)
    }
}

/// Window geometry and per-sample deadlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Window length N in samples
    pub window_len: usize,
    /// Samples appended per sliding cycle (k)
    pub slide_len: usize,
    /// Maximum wait for a single sample in milliseconds
    pub sample_timeout_ms: u64,
    /// Consecutive failed fill/slide calls before a sensor soft reset
    pub soft_reset_after: u32,
    /// Effective sample rate after on-sensor averaging, in Hz
    pub sample_rate_hz: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            window_len: 50,
            slide_len: 12,
            sample_timeout_ms: 100,
            soft_reset_after: 5,
            sample_rate_hz: 25.0,
        }
    }
}

impl AcquisitionConfig {
    /// Per-sample timeout.
    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

/// Conditioning stages. They always run in the order moving average, band limit,
/// baseline removal; each can be switched off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    /// Moving-average length w; 0 or 1 disables smoothing
    pub smoothing_window: usize,
    /// Two-stage recursive band limiter
    pub band_limit: BandLimitConfig,
    /// Subtract each channel's mean after the other stages
    pub remove_baseline: bool,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            band_limit: BandLimitConfig::default(),
            remove_baseline: false,
        }
    }
}

/// Fixed coefficients for the high-pass/low-pass band limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandLimitConfig {
    /// Whether the band limiter runs at all
    pub enabled: bool,
    /// High-pass coefficient (0.5 Hz corner at 100 Hz)
    pub highpass_alpha: f64,
    /// Low-pass coefficient (4 Hz corner)
    pub lowpass_beta: f64,
}

impl Default for BandLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            highpass_alpha: 0.95,
            lowpass_beta: 0.1,
        }
    }
}

/// LED drive bounds and step sizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    /// Drive level after (re)initialisation
    pub initial: u16,
    /// Lowest drive level the controller will command
    pub min: u16,
    /// Highest drive level the controller will command
    pub max: u16,
    /// Decrease applied on saturation
    pub step_down: u16,
    /// Increase applied on weak signal
    pub step_up: u16,
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            initial: 60,
            min: 20,
            max: 120,
            step_down: 25,
            step_up: 30,
        }
    }
}

/// Limits for one optical channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelThresholds {
    /// Maximum raw magnitude must stay below this (saturation ceiling)
    pub ceiling: u32,
    /// Minimum raw magnitude must reach this (skin contact floor)
    pub floor: u32,
    /// Required max-min amplitude over the window
    pub min_pulsatile: u32,
    /// Amplitude above which the channel counts as overdriven
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pulsatile: Option<u32>,
}

/// Signal-quality gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Infrared channel limits
    pub ir: ChannelThresholds,
    /// Red channel limits
    pub red: ChannelThresholds,
    /// Consecutive acceptable cycles before the window is trusted
    pub required_consecutive: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            ir: ChannelThresholds {
                ceiling: 240_000,
                floor: 20_000,
                min_pulsatile: 6_000,
                max_pulsatile: Some(200_000),
            },
            red: ChannelThresholds {
                ceiling: 240_000,
                floor: 10_000,
                min_pulsatile: 3_000,
                max_pulsatile: None,
            },
            required_consecutive: 1,
        }
    }
}

/// HR history and jump rejection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Capacity M of the accepted-HR history
    pub history_len: usize,
    /// Largest accepted change from the previous accepted HR, in bpm
    pub max_jump: i32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            history_len: 8,
            max_jump: 20,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `config/biowatch.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(MonitorConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BIOWATCH_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| MonitorError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let fail = |msg: String| Err(MonitorError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return fail(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return fail(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        let acq = &self.acquisition;
        if acq.window_len == 0 {
            return fail("window_len must be greater than 0".into());
        }
        if acq.slide_len == 0 || acq.slide_len > acq.window_len {
            return fail(format!(
                "slide_len {} must be within 1..={}",
                acq.slide_len, acq.window_len
            ));
        }
        if acq.sample_timeout_ms == 0 {
            return fail("sample_timeout_ms must be greater than 0".into());
        }
        if acq.soft_reset_after == 0 {
            return fail("soft_reset_after must be greater than 0".into());
        }
        if !(acq.sample_rate_hz.is_finite() && acq.sample_rate_hz > 0.0) {
            return fail("sample_rate_hz must be positive and finite".into());
        }

        let cond = &self.conditioning;
        if cond.smoothing_window > acq.window_len {
            return fail(format!(
                "smoothing_window {} exceeds window_len {}",
                cond.smoothing_window, acq.window_len
            ));
        }
        let band = &cond.band_limit;
        for (name, value) in [
            ("highpass_alpha", band.highpass_alpha),
            ("lowpass_beta", band.lowpass_beta),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return fail(format!("{name} {value} must be within (0, 1]"));
            }
        }

        let gain = &self.gain;
        if gain.min > gain.max {
            return fail(format!("gain min {} exceeds max {}", gain.min, gain.max));
        }
        if gain.initial < gain.min || gain.initial > gain.max {
            return fail(format!(
                "gain initial {} outside [{}, {}]",
                gain.initial, gain.min, gain.max
            ));
        }
        if gain.step_down == 0 || gain.step_up == 0 {
            return fail("gain steps must be greater than 0".into());
        }

        for (name, limits) in [("ir", &self.quality.ir), ("red", &self.quality.red)] {
            if limits.floor >= limits.ceiling {
                return fail(format!(
                    "{name} floor {} must be below ceiling {}",
                    limits.floor, limits.ceiling
                ));
            }
            if let Some(max) = limits.max_pulsatile {
                if max < limits.min_pulsatile {
                    return fail(format!(
                        "{name} max_pulsatile {max} below min_pulsatile {}",
                        limits.min_pulsatile
                    ));
                }
            }
        }
        if self.quality.required_consecutive == 0 {
            return fail("required_consecutive must be at least 1".into());
        }

        if self.smoothing.history_len == 0 {
            return fail("history_len must be greater than 0".into());
        }
        if self.smoothing.max_jump < 0 {
            return fail("max_jump must not be negative".into());
        }

        Ok(())
    }
}
