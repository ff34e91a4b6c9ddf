//! Simulation engine abstraction
//!
//! Every backend implements [`SimulationEngine`]. Engines are created through
//! [`create_engine`] and owned by exactly one controller; calls block for the
//! full duration of a simulation.

use echoscan_core::config::EngineConfig;
use echoscan_core::{RawIqFrame, ScanSequence};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::scatterers::{BeamProfile, ExcitationSignal, FixedScatterers, SplineScatterers};
use crate::simulator::ReferenceSimulator;

/// Result type for engine operations
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised by simulation engines
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidParameter { key: String, value: String },

    #[error("No scan sequence configured")]
    NoScanSequence,

    #[error("Engine creation failed: {0}")]
    Creation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Common interface for simulation backends
pub trait SimulationEngine: Send {
    /// Backend name
    fn name(&self) -> &str;

    /// Install the scan sequence used by the next `simulate_lines` call.
    fn set_scan_sequence(&mut self, sequence: &ScanSequence) -> SimResult<()>;

    /// Simulate every line of the installed sequence.
    fn simulate_lines(&mut self) -> SimResult<RawIqFrame>;

    /// Number of fixed plus spline scatterers
    fn total_num_scatterers(&self) -> usize;

    /// Set a backend parameter by name.
    fn set_parameter(&mut self, key: &str, value: &str) -> SimResult<()>;

    fn clear_fixed_scatterers(&mut self);

    fn clear_spline_scatterers(&mut self);

    fn add_fixed_scatterers(&mut self, scatterers: Arc<FixedScatterers>) -> SimResult<()>;

    fn add_spline_scatterers(&mut self, scatterers: Arc<SplineScatterers>) -> SimResult<()>;

    fn set_excitation(&mut self, excitation: ExcitationSignal) -> SimResult<()>;

    fn set_beam_profile(&mut self, profile: BeamProfile) -> SimResult<()>;

    /// Named diagnostic vector, `None` for unknown keys
    fn debug_data(&self, key: &str) -> Option<Vec<f64>> {
        let _ = key;
        None
    }
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// GPU when available, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineKind::Auto => "auto",
            EngineKind::Cpu => "cpu",
            EngineKind::Gpu => "gpu",
        };
        f.write_str(s)
    }
}

impl FromStr for EngineKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EngineKind::Auto),
            "cpu" => Ok(EngineKind::Cpu),
            "gpu" => Ok(EngineKind::Gpu),
            other => Err(SimError::Creation(format!("unknown engine kind '{}'", other))),
        }
    }
}

/// Compute resources visible to this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub gpu_supported: bool,
    pub cpu_threads: usize,
}

impl HardwareInfo {
    pub fn detect() -> Self {
        let cpu_threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            // no GPU backend is compiled into this build
            gpu_supported: false,
            cpu_threads,
        }
    }

    pub fn log(&self) {
        info!(
            gpu_supported = self.gpu_supported,
            cpu_threads = self.cpu_threads,
            "Hardware detected"
        );
    }
}

/// Create an engine and apply the configured parameters.
pub fn create_engine(kind: EngineKind, config: &EngineConfig) -> SimResult<Box<dyn SimulationEngine>> {
    let hw = HardwareInfo::detect();
    let resolved = match kind {
        EngineKind::Auto if hw.gpu_supported => EngineKind::Gpu,
        EngineKind::Auto => EngineKind::Cpu,
        other => other,
    };

    let mut engine: Box<dyn SimulationEngine> = match resolved {
        EngineKind::Gpu => {
            return Err(SimError::Creation(format!(
                "GPU device {} requested but no GPU backend is available",
                config.gpu_device
            )));
        }
        _ => Box::new(ReferenceSimulator::new()?),
    };

    apply_engine_config(engine.as_mut(), config)?;
    info!(engine = engine.name(), requested = %kind, "Simulation engine created");
    Ok(engine)
}

/// Push every parameter of `config` into an engine.
///
/// Typed settings are mandatory; keys in `config.parameters` that the engine
/// does not know are logged and skipped.
pub fn apply_engine_config(engine: &mut dyn SimulationEngine, config: &EngineConfig) -> SimResult<()> {
    engine.set_parameter("sound_speed", &config.sound_speed.to_string())?;
    engine.set_parameter("radial_decimation", &config.radial_decimation.to_string())?;
    engine.set_parameter("noise_amplitude", &config.noise_amplitude.to_string())?;
    engine.set_parameter("num_cpu_cores", &config.num_cpu_cores.to_string())?;
    engine.set_parameter("phase_delay", if config.phase_delay { "on" } else { "off" })?;
    if let Some(seed) = config.noise_seed {
        engine.set_parameter("noise_seed", &seed.to_string())?;
    }
    for (key, value) in &config.parameters {
        match engine.set_parameter(key, value) {
            Err(SimError::UnknownParameter(_)) => {
                warn!(key = %key, "Engine does not know parameter, ignoring")
            }
            other => other?,
        }
    }
    Ok(())
}
