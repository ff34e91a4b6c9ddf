//! echoscan command-line interface
//!
//! - `run`: timer-driven playback with optional PNG output and IQ recording
//! - `simulate`: a single acquisition at a given time
//! - `replay`: scan-convert frames from a recorded IQ container
//! - `info`: hardware and configuration summary
//! - `example-config`: print a documented configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echoscan_core::observe::{init_logging, LogLevel, SessionMetrics};
use echoscan_core::SessionConfig;
use echoscan_session::{
    FeedbackSubscriber, ImageFormationPipeline, ImageSaver, NormalizationFeedback, PlaybackLoop,
    SessionController,
};
use echoscan_sim::HardwareInfo;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(name = "echoscan")]
#[command(author, version, about = "Ultrasound simulation session", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (defaults to the usual search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Advance time and acquire until stopped
    Run {
        /// Number of ticks (overrides playback.max_ticks)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Directory for PNG images
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record B-mode IQ and export it here on exit
        #[arg(long)]
        record: Option<PathBuf>,

        /// Tick interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Run one acquisition
    Simulate {
        /// Simulation time in seconds
        #[arg(long, default_value = "0.0")]
        time: f64,

        /// Directory for PNG images
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also acquire color Doppler
        #[arg(long)]
        color: bool,
    },

    /// Scan-convert a recorded IQ container
    Replay {
        /// IQ container
        input: PathBuf,

        /// Directory for PNG images
        #[arg(short, long, default_value = "replay")]
        output: PathBuf,
    },

    /// Show hardware and configuration
    Info,

    /// Print an example configuration
    ExampleConfig,
}

fn load_config(path: Option<&Path>, verbose: u8) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SessionConfig::load().context("failed to load config")?,
    };
    config.validate().context("invalid configuration")?;
    if verbose > 0 {
        config.logging.level = LogLevel::from_verbosity(verbose);
    }
    Ok(config)
}

/// Pipeline plus a controller wired to it with shared metrics and feedback.
fn start_session(config: &SessionConfig, output: Option<&Path>) -> Result<SessionController> {
    let metrics = Arc::new(SessionMetrics::new());
    let feedback = NormalizationFeedback::new(config.bmode.normalization_const);
    let saver = output
        .map(ImageSaver::new)
        .transpose()
        .context("failed to create image directory")?;
    let pipeline = ImageFormationPipeline::spawn(
        FeedbackSubscriber::new(saver, feedback.clone()),
        Arc::clone(&metrics),
        config.pipeline.queue_warn_depth,
    )?;

    let controller = SessionController::from_config(config, Box::new(pipeline))
        .context("failed to create simulation session")?
        .with_metrics(metrics)
        .with_feedback(feedback);
    Ok(controller)
}

fn print_metrics(metrics: &SessionMetrics) {
    let snap = metrics.snapshot();
    println!();
    println!("B-mode acquisitions: {}", snap.bmode_acquisitions);
    println!("Color packets:       {}", snap.color_acquisitions);
    println!("Failures:            {}", snap.acquisition_failures);
    println!("Images formed:       {}", snap.results_delivered);
    println!("Avg simulate:        {:.2} ms", snap.avg_simulate_ms());
    println!("Avg formation:       {:.2} ms", snap.avg_formation_ms());
}

fn cmd_run(
    mut config: SessionConfig,
    ticks: Option<u64>,
    output: Option<PathBuf>,
    record: Option<PathBuf>,
    interval_ms: Option<u64>,
) -> Result<()> {
    if ticks.is_some() {
        config.playback.max_ticks = ticks;
    }
    if let Some(ms) = interval_ms {
        config.playback.interval_ms = ms;
    }
    let record = record.or_else(|| config.recording.output.clone());
    config.recording.enabled |= record.is_some();
    let output = output.or_else(|| config.playback.image_dir.clone());

    let mut session = start_session(&config, output.as_deref())?;
    let metrics = Arc::clone(session.metrics());
    println!("=== echoscan playback ===");
    println!("Engine: {}, scatterers: {}", session.engine_name(), session.total_num_scatterers());

    let summary = PlaybackLoop::from_config(&config.playback).run(&mut session);
    println!("Ticks: {} ({} failed)", summary.ticks, summary.failures);

    if let Some(path) = record {
        let frames = session.iq_buffer().len();
        session
            .save_iq_buffer(&path)
            .with_context(|| format!("failed to export IQ buffer to {}", path.display()))?;
        println!("Recorded {} frames to {}", frames, path.display());
    }

    // joins the formation worker once every queued image is done
    drop(session);
    print_metrics(&metrics);
    Ok(())
}

fn cmd_simulate(mut config: SessionConfig, time: f64, output: Option<PathBuf>, color: bool) -> Result<()> {
    config.color.enabled |= color;
    let mut session = start_session(&config, output.as_deref())?;
    let metrics = Arc::clone(session.metrics());
    session.set_time(time);

    let report = session.simulate().context("acquisition failed")?;
    println!("=== echoscan acquisition at t = {:.4} s ===", report.sim_time);
    if let Some(b) = report.bmode {
        println!(
            "B-mode: {:.2} ms, {} radial samples, {:.3} ns/scatterer/line",
            b.elapsed_ms, b.radial_samples, b.ns_per_scatterer_per_line
        );
    }
    if let Some(c) = report.color {
        println!("Color:  {} packets, {:.2} ms/packet", c.packets, c.avg_ms_per_packet);
    }

    drop(session);
    print_metrics(&metrics);
    Ok(())
}

fn cmd_replay(config: SessionConfig, input: PathBuf, output: PathBuf) -> Result<()> {
    let start = Instant::now();
    let mut session = start_session(&config, Some(&output))?;
    let metrics = Arc::clone(session.metrics());
    let frames = session
        .replay_iq(&input)
        .with_context(|| format!("failed to replay {}", input.display()))?;
    drop(session);
    println!(
        "Replayed {} frames from {} into {} in {:.1} s",
        frames,
        input.display(),
        output.display(),
        start.elapsed().as_secs_f64()
    );
    print_metrics(&metrics);
    Ok(())
}

fn cmd_info(config: &SessionConfig) {
    let hw = HardwareInfo::detect();
    let extent = config.scan.geometry.xy_extent();
    println!("=== echoscan ===");
    println!("GPU supported: {}", hw.gpu_supported);
    println!("CPU threads:   {}", hw.cpu_threads);
    println!("Backend:       {}", config.engine.backend);
    println!("Geometry:      {:?}", config.scan.geometry);
    println!("Lines:         {}", config.scan.num_lines);
    println!(
        "Extent:        x [{:.4}, {:.4}] m, y [{:.4}, {:.4}] m",
        extent.x_min, extent.x_max, extent.y_min, extent.y_max
    );
    println!(
        "Time:          [{}, {}] step {}",
        config.time.min, config.time.max, config.time.step
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.verbose)?;
    init_logging(&config.logging);

    let hw = HardwareInfo::detect();
    hw.log();
    info!(command = ?std::env::args().nth(1), "echoscan starting");

    match cli.command {
        Commands::Run { ticks, output, record, interval_ms } => {
            cmd_run(config, ticks, output, record, interval_ms)
        }
        Commands::Simulate { time, output, color } => cmd_simulate(config, time, output, color),
        Commands::Replay { input, output } => cmd_replay(config, input, output),
        Commands::Info => {
            cmd_info(&config);
            Ok(())
        }
        Commands::ExampleConfig => {
            print!("{}", SessionConfig::example_yaml());
            Ok(())
        }
    }
}
