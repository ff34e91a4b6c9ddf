//! # Session Configuration
//!
//! YAML configuration for echoscan sessions:
//!
//! - Simulation engine selection and reference simulator parameters
//! - Time axis range and step
//! - Scan geometry, line count and timestamp policy
//! - Probe motion
//! - B-mode / color-Doppler acquisition and display settings
//! - Pipeline, recording, playback and logging
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via `ECHOSCAN_CONFIG` environment variable
//! 2. `./echoscan.yaml` (current directory)
//! 3. `~/.config/echoscan/config.yaml` (user config)
//! 4. `/etc/echoscan/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! engine:
//!   backend: cpu
//!   radial_decimation: 15
//!
//! scan:
//!   geometry:
//!     type: sector
//!     width: 1.309
//!     radial_length: 0.12
//!   num_lines: 128
//!
//! color:
//!   enabled: true
//!   packet_size: 16
//!   prf: 2500.0
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::geometry::ScanGeometry;
use crate::observe::LogConfig;
use crate::probe::ProbeMotion;
use crate::scan_sequence::DEFAULT_SOUND_SPEED;

/// Error type for configuration operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {0}")]
    NotFound(String),

    #[error("failed to read config: {0}")]
    ReadError(String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Simulation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend name (auto, cpu, gpu)
    pub backend: String,
    /// GPU device index, used by GPU backends only
    pub gpu_device: usize,
    /// Worker threads for the CPU engine (0 = all available)
    pub num_cpu_cores: usize,
    /// Speed of sound in m/s
    pub sound_speed: f64,
    /// RF to IQ decimation factor
    pub radial_decimation: usize,
    /// Amplitude of additive complex Gaussian noise
    pub noise_amplitude: f64,
    /// Apply the per-scatterer sub-sample phase delay
    pub phase_delay: bool,
    /// Seed for the noise generator (random when unset)
    pub noise_seed: Option<u64>,
    /// Extra `key: value` pairs forwarded to the engine verbatim
    pub parameters: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: "auto".to_string(),
            gpu_device: 0,
            num_cpu_cores: 0,
            sound_speed: DEFAULT_SOUND_SPEED,
            radial_decimation: 15,
            noise_amplitude: 0.0,
            phase_delay: true,
            noise_seed: None,
            parameters: BTreeMap::new(),
        }
    }
}

/// Simulation time axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            step: 5e-3,
        }
    }
}

/// Scan geometry and line layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub geometry: ScanGeometry,
    pub num_lines: usize,
    /// Fire all lines at the same instant instead of sweeping
    pub equal_timestamps: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            geometry: ScanGeometry::default(),
            num_lines: 128,
            equal_timestamps: false,
        }
    }
}

/// B-mode acquisition and grayscale mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BModeConfig {
    pub enabled: bool,
    /// Envelope value mapped to 0 dB
    pub normalization_const: f32,
    /// Track the frame maximum as the next normalization constant
    pub auto_normalize: bool,
    /// Displayed dynamic range in dB
    pub dynamic_range: f32,
    /// Gain in dB added after log compression
    pub gain: f32,
}

impl Default for BModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            normalization_const: 1.0,
            auto_normalize: true,
            dynamic_range: 50.0,
            gain: 0.0,
        }
    }
}

/// Color-Doppler packet acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub enabled: bool,
    /// Firings per packet
    pub packet_size: usize,
    /// Pulse repetition frequency within a packet (Hz)
    pub prf: f64,
    /// Pixels below this fraction of the peak power are transparent
    pub power_threshold: f32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            packet_size: 16,
            prf: 2500.0,
            power_threshold: 0.05,
        }
    }
}

/// Largest accepted `display.max_image_side`
pub const MAX_IMAGE_SIDE: u32 = 16384;

/// Raster output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Raster resolution
    pub dots_per_meter: f64,
    /// Upper bound on either raster side in pixels
    pub max_image_side: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            dots_per_meter: 6000.0,
            max_image_side: 2048,
        }
    }
}

/// Image formation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Queue depth at which a backlog warning is logged
    pub queue_warn_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_warn_depth: 10 }
    }
}

/// IQ recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Push every B-mode frame into the IQ buffer
    pub enabled: bool,
    /// Export target written when a session ends
    pub output: Option<PathBuf>,
}

/// Playback loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Wall-clock delay between ticks
    pub interval_ms: u64,
    /// Stop after this many ticks (unbounded when unset)
    pub max_ticks: Option<u64>,
    /// Stop once the time axis reaches its maximum
    pub stop_at_end: bool,
    /// Directory for PNG frames
    pub image_dir: Option<PathBuf>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10,
            max_ticks: None,
            stop_at_end: true,
            image_dir: None,
        }
    }
}

/// Scatterer sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhantomConfig {
    /// Scatterer container to load; a generated phantom is used when unset
    pub scatterers: Option<PathBuf>,
    /// Fixed speckle scatterers in the generated phantom
    pub num_fixed: usize,
    /// Moving spline scatterers in the generated phantom
    pub num_spline: usize,
    /// Flow speed of the moving scatterers (m/s)
    pub flow_velocity: f64,
    pub seed: u64,
}

impl Default for PhantomConfig {
    fn default() -> Self {
        Self {
            scatterers: None,
            num_fixed: 20_000,
            num_spline: 500,
            flow_velocity: 0.2,
            seed: 42,
        }
    }
}

/// Beam profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Lateral Gaussian width (meters)
    pub sigma_lateral: f32,
    /// Elevational Gaussian width (meters)
    pub sigma_elevational: f32,
    /// Lookup-table container; overrides the Gaussian when set
    pub lut: Option<PathBuf>,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            sigma_lateral: 1e-3,
            sigma_elevational: 1e-3,
            lut: None,
        }
    }
}

/// Transmitted pulse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcitationConfig {
    /// Excitation container; a Gaussian pulse is generated when unset
    pub file: Option<PathBuf>,
    /// Centre frequency (Hz)
    pub center_frequency: f64,
    /// Fractional bandwidth of the generated pulse
    pub fractional_bandwidth: f64,
    /// RF sampling frequency (Hz)
    pub sampling_frequency: f64,
}

impl Default for ExcitationConfig {
    fn default() -> Self {
        Self {
            file: None,
            center_frequency: 2.5e6,
            fractional_bandwidth: 0.5,
            sampling_frequency: 50e6,
        }
    }
}

/// Complete echoscan configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub engine: EngineConfig,
    pub time: TimeConfig,
    pub scan: ScanConfig,
    pub probe: ProbeMotion,
    pub bmode: BModeConfig,
    pub color: ColorConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub recording: RecordingConfig,
    pub playback: PlaybackConfig,
    pub phantom: PhantomConfig,
    pub beam: BeamConfig,
    pub excitation: ExcitationConfig,
    pub logging: LogConfig,
}

impl SessionConfig {
    /// Load configuration from the default search path.
    ///
    /// Returns the default config if no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("ECHOSCAN_CONFIG") {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            return Self::load_from(&path);
        }

        for path in &Self::config_search_paths() {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
    }

    /// Get configuration search paths.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./echoscan.yaml")];

        if let Some(dirs) = directories::ProjectDirs::from("", "", "echoscan") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/echoscan/config.yaml"));
        paths
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scan
            .geometry
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.scan.num_lines == 0 {
            return Err(ConfigError::ValidationError("num_lines must be > 0".to_string()));
        }
        if !matches!(self.engine.backend.as_str(), "auto" | "cpu" | "gpu") {
            return Err(ConfigError::ValidationError(format!(
                "unknown engine backend '{}'",
                self.engine.backend
            )));
        }
        if !(self.engine.sound_speed > 0.0) {
            return Err(ConfigError::ValidationError("sound_speed must be positive".to_string()));
        }
        if self.engine.radial_decimation == 0 {
            return Err(ConfigError::ValidationError("radial_decimation must be > 0".to_string()));
        }
        if !(self.time.min <= self.time.max) || !(self.time.step > 0.0) {
            return Err(ConfigError::ValidationError(
                "time range must satisfy min <= max with a positive step".to_string(),
            ));
        }
        if self.color.enabled && (self.color.packet_size == 0 || !(self.color.prf > 0.0)) {
            return Err(ConfigError::ValidationError(
                "color packet_size and prf must be positive".to_string(),
            ));
        }
        if !(self.display.dots_per_meter > 0.0) || self.display.max_image_side == 0 {
            return Err(ConfigError::ValidationError(
                "display resolution must be positive".to_string(),
            ));
        }
        if self.display.max_image_side > MAX_IMAGE_SIDE {
            return Err(ConfigError::ValidationError(format!(
                "max_image_side {} exceeds {}",
                self.display.max_image_side, MAX_IMAGE_SIDE
            )));
        }
        if !(self.bmode.dynamic_range > 0.0) {
            return Err(ConfigError::ValidationError("dynamic_range must be positive".to_string()));
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example_yaml() -> String {
        let config = Self {
            color: ColorConfig {
                enabled: true,
                ..Default::default()
            },
            playback: PlaybackConfig {
                max_ticks: Some(200),
                image_dir: Some(PathBuf::from("frames")),
                ..Default::default()
            },
            recording: RecordingConfig {
                enabled: true,
                output: Some(PathBuf::from("iq_buffer.escn")),
            },
            ..Default::default()
        };

        serde_yaml::to_string(&config).unwrap_or_default()
    }
}
