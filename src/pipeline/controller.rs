//! Per-cycle measurement state machine.
//!
//! ```text
//! Init -> Filling -> { Sliding <-> Degraded <-> Measuring }
//! ```
//!
//! One call to [`PipelineController::run_cycle`] acquires data (a full fill or a slide
//! of `k` samples), updates the LED drive, gates on signal quality and, when the window
//! is trusted, estimates and publishes. Cycles never overlap. Every await talks to the
//! sensor and is bounded by the per-sample timeout, reads and commands alike, so a
//! wedged driver cannot hold a cycle past [`PipelineController::acquisition_budget`].
//!
//! Acquisition failures are counted. After `soft_reset_after` failures in a row the
//! sensor is soft-reset and the pipeline reinitialises: empty window, empty HR history,
//! quality run cleared and the drive back at its initial level.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::error::{AcquisitionError, AppResult, CommandError};
use crate::metrics::{MetricsPublisher, PublishedMetrics};
use crate::pipeline::conditioning::ConditioningFilter;
use crate::pipeline::estimator::{Estimator, RawEstimate};
use crate::pipeline::gain::{GainController, GainDecision};
use crate::pipeline::quality::{QualityGate, QualityVerdict, WindowStats};
use crate::pipeline::smoother::ResultSmoother;
use crate::pipeline::window::WindowBuffer;
use crate::sensor::{DriveLevel, SampleSource};

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing acquired yet; the next cycle reinitialises
    Init,
    /// Waiting for a complete initial window
    Filling,
    /// Advancing the window by `k` samples
    Sliding,
    /// Last cycle published a reading
    Measuring,
    /// Last cycle had a complete window that was not trusted, or its slide failed
    Degraded,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "INIT",
            PipelineState::Filling => "FILLING",
            PipelineState::Sliding => "SLIDING",
            PipelineState::Measuring => "MEASURING",
            PipelineState::Degraded => "DEGRADED",
        };
        f.write_str(name)
    }
}

/// Sensor commands a cycle can issue besides reads: the initial or restored drive level
/// and the per-cycle gain commit, or a soft reset and the restored drive level.
const COMMANDS_PER_CYCLE: usize = 2;

/// Time spent in each section of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleTimings {
    /// Fill or slide, including reinitialisation
    pub acquire: Duration,
    /// Conditioning, window statistics, gain commit and quality gate
    pub process: Duration,
    /// Estimator, envelope and smoother
    pub estimate: Duration,
}

/// What happened during one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// 1-based cycle counter
    pub cycle: u64,
    /// State reached at the end of the cycle
    pub state: PipelineState,
    /// Record published for this cycle
    pub metrics: PublishedMetrics,
    /// Drive decision, present whenever the cycle produced a complete window
    pub gain: Option<GainDecision>,
    /// Quality verdict, present whenever the cycle produced a complete window
    pub verdict: Option<QualityVerdict>,
    /// Estimator output before the envelope, present in `Measuring`
    pub estimate: Option<RawEstimate>,
    /// Acquisition failure that aborted the cycle
    pub failure: Option<AcquisitionError>,
    /// Drive-level or reset commands that failed or timed out
    pub command_faults: Vec<CommandError>,
    /// The sensor was soft-reset at the end of this cycle
    pub soft_reset: bool,
    /// Per-section timing
    pub timings: CycleTimings,
    /// Wall time spent in the cycle
    pub elapsed: Duration,
}

/// Composes window, conditioning, gain, quality, estimator and smoother.
///
/// The controller owns every piece of mutable pipeline state. Consumers observe it
/// through [`subscribe`](Self::subscribe) only.
pub struct PipelineController<S, E> {
    config: MonitorConfig,
    source: S,
    estimator: E,
    window: WindowBuffer,
    filter: ConditioningFilter,
    quality: QualityGate,
    gain: GainController,
    smoother: ResultSmoother,
    publisher: MetricsPublisher,
    state: PipelineState,
    cycle: u64,
    consecutive_failures: u32,
    command_faults: Vec<CommandError>,
}

impl<S, E> PipelineController<S, E>
where
    S: SampleSource,
    E: Estimator,
{
    /// Build a controller in `Init`. The configuration is validated first.
    pub fn new(config: MonitorConfig, source: S, estimator: E) -> AppResult<Self> {
        config.validate()?;

        let acq = &config.acquisition;
        Ok(Self {
            window: WindowBuffer::new(acq.window_len, acq.sample_timeout()),
            filter: ConditioningFilter::new(&config.conditioning),
            quality: QualityGate::new(config.quality.clone()),
            gain: GainController::new(config.gain, config.quality.clone()),
            smoother: ResultSmoother::new(config.smoothing),
            publisher: MetricsPublisher::new(),
            state: PipelineState::Init,
            cycle: 0,
            consecutive_failures: 0,
            command_faults: Vec::new(),
            config,
            source,
            estimator,
        })
    }

    /// State reached by the last cycle.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of cycles run so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Current LED drive level.
    pub fn drive_level(&self) -> DriveLevel {
        self.gain.level()
    }

    /// Failed acquisitions since the last success or reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Configuration in use.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Window contents, for inspection.
    pub fn window(&self) -> &WindowBuffer {
        &self.window
    }

    /// Smoother history, for inspection.
    pub fn smoother(&self) -> &ResultSmoother {
        &self.smoother
    }

    /// Sensor collaborator.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Sensor collaborator, mutably (e.g. to simulate finger removal).
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Receiver for the published metrics.
    pub fn subscribe(&self) -> watch::Receiver<PublishedMetrics> {
        self.publisher.subscribe()
    }

    /// Latest published metrics.
    pub fn metrics(&self) -> PublishedMetrics {
        self.publisher.current()
    }

    /// Longest a single cycle can spend waiting on the sensor, reads and commands
    /// included.
    pub fn acquisition_budget(&self) -> Duration {
        let waits = self.config.acquisition.window_len + COMMANDS_PER_CYCLE;
        self.window.acquisition_budget(waits)
    }

    /// Run one complete cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        self.cycle += 1;

        if self.state == PipelineState::Init {
            self.reinitialise().await;
        }

        let acquired = match self.state {
            PipelineState::Init | PipelineState::Filling => {
                self.transition(PipelineState::Filling);
                self.window.fill_initial(&mut self.source).await
            }
            PipelineState::Sliding | PipelineState::Measuring | PipelineState::Degraded => {
                self.transition(PipelineState::Sliding);
                let k = self.config.acquisition.slide_len;
                self.window.slide_and_append(&mut self.source, k).await
            }
        };
        let acquire = started.elapsed();

        let mut report = match acquired {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.process_window().await
            }
            Err(failure) => self.handle_failure(failure).await,
        };
        report.timings.acquire = acquire;
        report.command_faults = std::mem::take(&mut self.command_faults);

        self.publisher.publish(report.metrics.clone());
        report.elapsed = started.elapsed();

        let latest = self.window.latest();
        debug!(
            cycle = report.cycle,
            state = %report.state,
            acquire_us = report.timings.acquire.as_micros() as u64,
            process_us = report.timings.process.as_micros() as u64,
            estimate_us = report.timings.estimate.as_micros() as u64,
            elapsed_ms = report.elapsed.as_millis() as u64,
            raw_ir = latest.map(|s| s.ir),
            raw_red = latest.map(|s| s.red),
            "Cycle complete"
        );
        report
    }

    /// Gain, quality gate and, if trusted, estimation on a complete window.
    async fn process_window(&mut self) -> CycleReport {
        let started = Instant::now();
        let snapshot = self.window.snapshot();
        let conditioned = self.filter.apply(&snapshot);
        let stats = WindowStats::from_snapshot(&snapshot);

        let decision = self.gain.apply(&stats);
        self.commit_drive(decision.level).await;

        let verdict = self.quality.assess_stats(stats);
        let mut report = self.report(PipelineState::Degraded);
        report.gain = Some(decision);
        report.verdict = Some(verdict);
        report.timings.process = started.elapsed();

        if !verdict.trusted {
            self.transition(PipelineState::Degraded);
            return report;
        }

        let started = Instant::now();
        let estimate = self.estimator.estimate(&conditioned);
        report.metrics = self.apply_estimate(&estimate);
        report.estimate = Some(estimate);
        report.state = PipelineState::Measuring;
        report.timings.estimate = started.elapsed();
        self.transition(PipelineState::Measuring);
        report
    }

    /// Envelope, smoothing and assembly of the published record.
    fn apply_estimate(&mut self, estimate: &RawEstimate) -> PublishedMetrics {
        let mut metrics = PublishedMetrics::empty(self.cycle);

        match estimate.accepted_hr() {
            Some(candidate) => {
                let update = self.smoother.on_new_hr(candidate);
                metrics.heart_rate_bpm = update.published;
                metrics.heart_rate_valid = update.accepted;
            }
            None => debug!(hr = estimate.hr, valid = estimate.hr_valid, "HR outside envelope"),
        }

        match estimate.accepted_spo2() {
            Some(spo2) => {
                metrics.spo2_percent = Some(spo2);
                metrics.spo2_valid = true;
            }
            None => debug!(
                spo2 = estimate.spo2,
                valid = estimate.spo2_valid,
                "SpO2 outside envelope"
            ),
        }

        metrics
    }

    async fn handle_failure(&mut self, failure: AcquisitionError) -> CycleReport {
        self.consecutive_failures += 1;
        self.quality.reset();

        let limit = self.config.acquisition.soft_reset_after;
        warn!(
            state = %self.state,
            failures = self.consecutive_failures,
            limit,
            error = %failure,
            "Acquisition failed"
        );

        // A failed fill stays in Filling; a failed slide keeps the window and reports
        // no reading.
        let next = match self.state {
            PipelineState::Filling => PipelineState::Filling,
            _ => PipelineState::Degraded,
        };
        self.transition(next);

        let mut report = self.report(next);
        report.failure = Some(failure);

        if self.consecutive_failures >= limit {
            self.recover().await;
            report.state = self.state;
            report.soft_reset = true;
        }
        report
    }

    /// Soft-reset the sensor and start over from an empty window.
    async fn recover(&mut self) {
        error!(
            failures = self.consecutive_failures,
            "Too many acquisition failures, soft-resetting sensor"
        );
        let deadline = self.window.sample_timeout();
        if let Err(e) = send_command(deadline, "soft_reset", self.source.soft_reset()).await {
            error!(error = %e, "Sensor soft reset failed");
            self.command_faults.push(e);
        }
        self.reinitialise().await;
    }

    /// Clear all pipeline state and apply the initial drive level.
    async fn reinitialise(&mut self) {
        self.window.clear();
        self.quality.reset();
        self.smoother.clear();
        self.gain.reset();
        self.consecutive_failures = 0;
        self.commit_drive(self.gain.level()).await;
        info!(drive = self.gain.level(), "Pipeline initialised");
        self.transition(PipelineState::Filling);
    }

    /// Send the drive level to the sensor. A failure is logged and the cycle goes on
    /// with the controller's own level.
    async fn commit_drive(&mut self, level: DriveLevel) {
        let deadline = self.window.sample_timeout();
        let command = self.source.set_drive_level(level);
        if let Err(e) = send_command(deadline, "set_drive_level", command).await {
            warn!(level, error = %e, "Failed to apply LED drive level");
            self.command_faults.push(e);
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            info!(from = %self.state, to = %next, cycle = self.cycle, "Pipeline state change");
            self.state = next;
        }
    }

    fn report(&self, state: PipelineState) -> CycleReport {
        CycleReport {
            cycle: self.cycle,
            state,
            metrics: PublishedMetrics::empty(self.cycle),
            gain: None,
            verdict: None,
            estimate: None,
            failure: None,
            command_faults: Vec::new(),
            soft_reset: false,
            timings: CycleTimings::default(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Await a sensor command under the per-sample deadline.
async fn send_command<F>(
    deadline: Duration,
    command: &'static str,
    call: F,
) -> Result<(), CommandError>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match timeout(deadline, call).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CommandError::Rejected {
            command,
            message: e.to_string(),
        }),
        Err(_) => Err(CommandError::Timeout {
            command,
            timeout: deadline,
        }),
    }
}
