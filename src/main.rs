//! CLI Entry Point for biowatch
//!
//! Provides command-line interface for:
//! - Running the measurement pipeline against the synthetic mock sensor
//! - Replaying a recorded `red,ir` capture through the pipeline
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Run against the mock sensor:
//! ```bash
//! biowatch run --cycles 50 --bpm 84
//! ```
//!
//! Replay a capture as JSON lines, in real time:
//! ```bash
//! biowatch replay capture.csv --paced --json
//! ```

use anyhow::{anyhow, Result};
use biowatch_core::config::{MonitorConfig, DEFAULT_CONFIG_PATH};
use biowatch_core::metrics::PublishedMetrics;
use biowatch_core::pipeline::{PeakIntervalEstimator, PipelineController};
use biowatch_core::sensor::mock::{MockPpgSensor, MockSensorConfig};
use biowatch_core::sensor::SampleSource;
use biowatch_core::tracing_setup;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "biowatch")]
#[command(about = "Optical heart-rate and SpO2 measurement core", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline against the synthetic sensor
    Run {
        /// Stop after this many cycles (default: run until Ctrl-C)
        #[arg(long)]
        cycles: Option<u64>,

        /// Simulated heart rate
        #[arg(long, default_value = "72")]
        bpm: f64,

        /// Simulated oxygen saturation
        #[arg(long, default_value = "97")]
        spo2: f64,

        /// Start with no finger on the sensor
        #[arg(long)]
        finger_off: bool,

        /// Noise seed
        #[arg(long, default_value = "24301")]
        seed: u64,

        /// Print metrics as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Replay a recorded red,ir capture through the pipeline
    #[cfg(feature = "replay_csv")]
    Replay {
        /// CSV file with `red,ir` columns
        csv: PathBuf,

        /// Start over when the capture ends
        #[arg(long = "loop")]
        looping: bool,

        /// Deliver samples at the configured sample rate instead of as fast as possible
        #[arg(long)]
        paced: bool,

        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Print metrics as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MonitorConfig::load_from(&cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Run {
            cycles,
            bpm,
            spo2,
            finger_off,
            seed,
            json,
        } => {
            tracing_setup::init_from_config(&config).map_err(|e| anyhow!(e))?;
            let mut sensor = MockPpgSensor::new(MockSensorConfig {
                sample_rate_hz: config.acquisition.sample_rate_hz,
                heart_rate_bpm: bpm,
                spo2_percent: spo2,
                paced: true,
                seed,
                ..Default::default()
            });
            sensor.set_finger_present(!finger_off);
            run_pipeline(config, sensor, cycles, json).await
        }
        #[cfg(feature = "replay_csv")]
        Commands::Replay {
            csv,
            looping,
            paced,
            cycles,
            json,
        } => {
            use biowatch_core::sensor::replay::CsvReplaySensor;

            tracing_setup::init_from_config(&config).map_err(|e| anyhow!(e))?;
            let mut sensor = CsvReplaySensor::open(&csv)?.looping(looping);
            if paced {
                sensor = sensor.paced(config.acquisition.sample_rate_hz);
            }
            info!(path = %csv.display(), samples = sensor.len(), paced, "Replaying capture");
            run_pipeline(config, sensor, cycles, json).await
        }
    }
}

/// Drive the pipeline until the cycle limit or Ctrl-C, printing every published record.
async fn run_pipeline<S>(
    config: MonitorConfig,
    sensor: S,
    cycles: Option<u64>,
    json: bool,
) -> Result<()>
where
    S: SampleSource,
{
    let delay = config.application.update_delay();
    let estimator = PeakIntervalEstimator::new(config.acquisition.sample_rate_hz);
    let mut controller = PipelineController::new(config, sensor, estimator)?;

    info!(
        budget_ms = controller.acquisition_budget().as_millis() as u64,
        "Pipeline ready"
    );

    let display = tokio::spawn(display_metrics(controller.subscribe(), json));

    // Cycles always run to completion; Ctrl-C is honoured between them
    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    loop {
        let report = controller.run_cycle().await;
        if let Some(failure) = &report.failure {
            warn!(cycle = report.cycle, error = %failure, "No reading this cycle");
        }
        if cycles.is_some_and(|limit| report.cycle >= limit) || *stop_rx.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(()) = stop_rx.changed() => {}
        }
        if *stop_rx.borrow() {
            info!("Interrupted");
            break;
        }
    }

    drop(controller);
    display.await?;
    Ok(())
}

/// Print each published record until the controller goes away.
async fn display_metrics(mut rx: watch::Receiver<PublishedMetrics>, json: bool) {
    while rx.changed().await.is_ok() {
        let metrics = rx.borrow_and_update().clone();
        if json {
            match serde_json::to_string(&metrics) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to encode metrics"),
            }
        } else {
            println!("{metrics}");
        }
    }
}
