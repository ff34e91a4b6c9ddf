//! Simulation session controller
//!
//! ```text
//!          simulate()
//!   Idle ─────────────► Acquiring ──ok──► Dispatched ──► Idle
//!    ▲                      │
//!    └──────── error ───────┘   (nothing reaches the pipeline or the buffer)
//! ```
//!
//! The controller exclusively owns the engine. Acquisition runs
//! synchronously on the calling thread; formation results arrive later on
//! the pipeline worker and never feed back into the controller except through
//! the shared normalization cell.

use echoscan_core::config::{EngineConfig, SessionConfig};
use echoscan_core::observe::SessionMetrics;
use echoscan_core::{
    ProbeMotion, ScanGeometry, ScanSequence, ScanSequenceBuilder, TimeAxis, TimeEvent, XyExtent,
};
use echoscan_sim::datasets::{load_beam_profile, load_excitation};
use echoscan_sim::{
    apply_engine_config, create_engine, read_iq_frames, BeamProfile, EngineKind, ExcitationSignal,
    GaussianProfile, Phantom, SimError, SimulationEngine,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accumulator::IqAccumulator;
use crate::acquisition::{run_bmode, run_color_doppler, BModeAcquisition, ColorAcquisition};
use crate::error::{SessionError, SessionResult};
use crate::pipeline::{NormalizationFeedback, TaskSink};
use crate::task::{BModeParams, BModeTask, ColorParams, ColorTask, WorkTask};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Dispatched,
}

/// Grayscale, color and raster settings applied to new tasks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySettings {
    pub bmode: BModeParams,
    pub color: ColorParams,
}

impl DisplaySettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            bmode: BModeParams::from_config(&config.bmode, &config.display),
            color: ColorParams::from_config(&config.color, &config.display),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BModeReport {
    pub elapsed_ms: f64,
    pub ns_per_scatterer_per_line: f64,
    pub radial_samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorReport {
    pub packets: usize,
    pub avg_ms_per_packet: f64,
}

/// Timing of one completed request
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionReport {
    pub sim_time: f64,
    pub bmode: Option<BModeReport>,
    pub color: Option<ColorReport>,
    pub tasks_submitted: usize,
    pub recorded: bool,
}

struct Acquired {
    color: Option<ColorAcquisition>,
    bmode: Option<BModeAcquisition>,
}

pub struct SessionController {
    engine: Box<dyn SimulationEngine>,
    sink: Box<dyn TaskSink>,
    metrics: Arc<SessionMetrics>,
    state: SessionState,

    time: TimeAxis,
    stale: Arc<AtomicBool>,

    builder: ScanSequenceBuilder,
    geometry: ScanGeometry,
    num_lines: usize,
    equal_timestamps: bool,
    probe: ProbeMotion,
    sequence: Option<ScanSequence>,

    bmode_enabled: bool,
    color_enabled: bool,
    packet_size: usize,
    prf: f64,
    display: DisplaySettings,
    feedback: NormalizationFeedback,

    recording: bool,
    accumulator: IqAccumulator,

    engine_config: EngineConfig,
    parameter_overrides: BTreeMap<String, String>,
    phantom: Option<Phantom>,
    excitation: Option<ExcitationSignal>,
    beam_profile: Option<BeamProfile>,
}

impl SessionController {
    /// Assemble a controller around an already configured engine.
    pub fn new(engine: Box<dyn SimulationEngine>, sink: Box<dyn TaskSink>, config: &SessionConfig) -> Self {
        let stale = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&stale);
        let time = TimeAxis::new(config.time.min, config.time.max, config.time.step)
            .with_observer(move |ev: TimeEvent| {
                if matches!(ev, TimeEvent::TimeChanged(_)) {
                    flag.store(true, Ordering::Release);
                }
            });

        Self {
            engine,
            sink,
            metrics: Arc::new(SessionMetrics::new()),
            state: SessionState::Idle,
            time,
            stale,
            builder: ScanSequenceBuilder::new(config.engine.sound_speed),
            geometry: config.scan.geometry.clone(),
            num_lines: config.scan.num_lines,
            equal_timestamps: config.scan.equal_timestamps,
            probe: config.probe.clone(),
            sequence: None,
            bmode_enabled: config.bmode.enabled,
            color_enabled: config.color.enabled,
            packet_size: config.color.packet_size,
            prf: config.color.prf,
            display: DisplaySettings::from_config(config),
            feedback: NormalizationFeedback::new(config.bmode.normalization_const),
            recording: config.recording.enabled,
            accumulator: IqAccumulator::new(),
            engine_config: config.engine.clone(),
            parameter_overrides: BTreeMap::new(),
            phantom: None,
            excitation: None,
            beam_profile: None,
        }
    }

    /// Create the configured engine and install phantom, excitation and beam.
    ///
    /// Scatterers come from `phantom.scatterers` when set, otherwise a
    /// phantom is generated inside the scan extent.
    pub fn from_config(config: &SessionConfig, sink: Box<dyn TaskSink>) -> SessionResult<Self> {
        let kind: EngineKind = config
            .engine
            .backend
            .parse()
            .map_err(|e: SimError| SessionError::EngineCreation(e.to_string()))?;
        let engine = create_engine(kind, &config.engine)
            .map_err(|e| SessionError::EngineCreation(e.to_string()))?;

        let mut controller = Self::new(engine, sink, config);
        controller.install_models(config)?;
        Ok(controller)
    }

    fn install_models(&mut self, config: &SessionConfig) -> SessionResult<()> {
        match &config.phantom.scatterers {
            Some(path) => self.load_scatterers(path)?,
            None => {
                let phantom = Phantom::generate(
                    &self.geometry,
                    &config.phantom,
                    self.time.min(),
                    self.time.max(),
                )?;
                self.install_phantom(phantom)?;
            }
        }

        match &config.excitation.file {
            Some(path) => self.load_excitation(path)?,
            None => {
                let pulse = ExcitationSignal::gaussian_pulse(
                    config.excitation.center_frequency,
                    config.excitation.fractional_bandwidth,
                    config.excitation.sampling_frequency,
                )?;
                self.set_excitation(pulse)?;
            }
        }

        match &config.beam.lut {
            Some(path) => self.load_beam_profile_lut(path)?,
            None => self.set_beam_profile(BeamProfile::Analytical(GaussianProfile::new(
                config.beam.sigma_lateral,
                config.beam.sigma_elevational,
            )))?,
        }
        Ok(())
    }

    /// Share metrics with the pipeline.
    pub fn with_metrics(mut self, metrics: Arc<SessionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Read auto-normalization results from `feedback`.
    pub fn with_feedback(mut self, feedback: NormalizationFeedback) -> Self {
        self.feedback = feedback;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.time
    }

    pub fn display(&self) -> &DisplaySettings {
        &self.display
    }

    pub fn iq_buffer(&self) -> &IqAccumulator {
        &self.accumulator
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    // ─── Time ────────────────────────────────────────────────────────────

    pub fn set_time(&mut self, t: f64) {
        self.time.set_time(t);
    }

    pub fn advance(&mut self) {
        self.time.advance();
    }

    pub fn reset_time(&mut self) {
        self.time.reset();
    }

    pub fn set_time_step(&mut self, dt: f64) {
        self.time.set_step(dt);
    }

    pub fn set_time_range(&mut self, min: f64, max: f64) {
        self.time.set_max(max);
        self.time.set_min(min);
    }

    // ─── Scan setup ──────────────────────────────────────────────────────

    /// Replace the geometry; invalid input leaves the current one in place.
    pub fn set_scan_geometry(
        &mut self,
        geometry: ScanGeometry,
        num_lines: usize,
        equal_timestamps: bool,
    ) -> SessionResult<()> {
        if num_lines == 0 {
            return Err(SessionError::InvalidGeometry("number of lines must be positive".to_string()));
        }
        geometry.validate()?;
        self.geometry = geometry;
        self.num_lines = num_lines;
        self.equal_timestamps = equal_timestamps;
        self.stale.store(true, Ordering::Release);
        self.ensure_sequence().map(|_| ())
    }

    pub fn set_probe_motion(&mut self, motion: ProbeMotion) -> SessionResult<()> {
        self.probe = motion;
        self.stale.store(true, Ordering::Release);
        self.ensure_sequence().map(|_| ())
    }

    pub fn geometry(&self) -> &ScanGeometry {
        &self.geometry
    }

    pub fn xy_extent(&self) -> XyExtent {
        self.geometry.xy_extent()
    }

    /// Current sequence, rebuilt first if time or setup changed.
    pub fn scan_sequence(&mut self) -> SessionResult<&ScanSequence> {
        self.ensure_sequence()
    }

    /// The flag is cleared only once the engine holds the new sequence, so a
    /// failed build or install is retried on the next request.
    fn ensure_sequence(&mut self) -> SessionResult<&ScanSequence> {
        if self.stale.load(Ordering::Acquire) || self.sequence.is_none() {
            let seq = self.builder.build(
                &self.geometry,
                self.num_lines,
                self.time.current(),
                &self.probe,
                self.equal_timestamps,
            )?;
            self.engine.set_scan_sequence(&seq)?;
            self.stale.store(false, Ordering::Release);
            debug!(lines = seq.num_lines(), time = self.time.current(), "Scan sequence rebuilt");
            self.sequence = Some(seq);
        }
        self.sequence
            .as_ref()
            .ok_or_else(|| SessionError::InvalidGeometry("no scan sequence".to_string()))
    }

    // ─── Modes and display ───────────────────────────────────────────────

    pub fn set_modes(&mut self, bmode: bool, color: bool) {
        self.bmode_enabled = bmode;
        self.color_enabled = color;
    }

    pub fn set_color_params(&mut self, packet_size: usize, prf: f64) -> SessionResult<()> {
        if packet_size == 0 || !(prf.is_finite() && prf > 0.0) {
            return Err(SessionError::InvalidRequest(format!(
                "packet size {} / PRF {} must be positive",
                packet_size, prf
            )));
        }
        self.packet_size = packet_size;
        self.prf = prf;
        Ok(())
    }

    pub fn set_display(&mut self, display: DisplaySettings) {
        self.display = display;
        self.feedback.set(display.bmode.normalization_const);
    }

    pub fn set_recording(&mut self, enabled: bool) {
        self.recording = enabled;
    }

    // ─── Engine parameters and models ────────────────────────────────────

    /// Forward a parameter to the engine; unknown keys are logged and ignored.
    pub fn set_parameter(&mut self, key: &str, value: &str) -> SessionResult<()> {
        match self.engine.set_parameter(key, value) {
            Ok(()) => {
                if key == "sound_speed" {
                    self.update_sound_speed(value);
                }
                self.parameter_overrides.insert(key.to_string(), value.to_string());
                Ok(())
            }
            Err(SimError::UnknownParameter(_)) => {
                warn!(key, value, engine = self.engine.name(), "Unknown engine parameter ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Swept line timestamps depend on the sound speed the engine uses.
    fn update_sound_speed(&mut self, value: &str) {
        match value.trim().parse::<f64>() {
            Ok(c) if c.is_finite() && c > 0.0 => {
                self.builder = ScanSequenceBuilder::new(c);
                self.stale.store(true, Ordering::Release);
                debug!(sound_speed = c, "Scan sequence builder updated");
            }
            _ => warn!(value, "Engine accepted a sound speed the scan builder cannot use"),
        }
    }

    pub fn set_noise_amplitude(&mut self, amplitude: f64) -> SessionResult<()> {
        self.set_parameter("noise_amplitude", &amplitude.to_string())
    }

    /// Replace the engine's scatterers.
    ///
    /// When the phantom contains spline scatterers the time axis is reset to
    /// their valid time range.
    pub fn install_phantom(&mut self, phantom: Phantom) -> SessionResult<()> {
        if phantom.fixed.is_none() && phantom.spline.is_none() {
            return Err(SessionError::NoScatterers("phantom".to_string()));
        }
        phantom.install(self.engine.as_mut())?;
        if let Some((t_min, t_max)) = phantom.spline.as_ref().and_then(|s| s.time_limits()) {
            self.set_time_range(t_min, t_max);
            self.time.reset();
            info!(t_min, t_max, "Time range set from spline scatterers");
        }
        info!(scatterers = self.engine.total_num_scatterers(), "Scatterers installed");
        self.phantom = Some(phantom);
        Ok(())
    }

    /// Load fixed and spline scatterers from a container.
    pub fn load_scatterers(&mut self, path: &Path) -> SessionResult<()> {
        let phantom = Phantom::load(path)?;
        match (&phantom.fixed, &phantom.spline) {
            (None, None) => return Err(SessionError::NoScatterers(path.display().to_string())),
            (None, Some(_)) => warn!(path = %path.display(), "No fixed scatterers in file"),
            (Some(_), None) => warn!(path = %path.display(), "No spline scatterers in file"),
            (Some(_), Some(_)) => {}
        }
        self.install_phantom(phantom)
    }

    pub fn set_excitation(&mut self, excitation: ExcitationSignal) -> SessionResult<()> {
        self.engine.set_excitation(excitation.clone())?;
        self.excitation = Some(excitation);
        Ok(())
    }

    pub fn load_excitation(&mut self, path: &Path) -> SessionResult<()> {
        let excitation = load_excitation(path)?;
        info!(path = %path.display(), samples = excitation.samples.len(), "Excitation loaded");
        self.set_excitation(excitation)
    }

    pub fn set_beam_profile(&mut self, profile: BeamProfile) -> SessionResult<()> {
        info!(kind = profile.kind(), "Beam profile set");
        self.engine.set_beam_profile(profile.clone())?;
        self.beam_profile = Some(profile);
        Ok(())
    }

    pub fn load_beam_profile_lut(&mut self, path: &Path) -> SessionResult<()> {
        let lut = load_beam_profile(path)?;
        self.set_beam_profile(BeamProfile::Lookup(lut))
    }

    /// Swap in a new engine and bring it to the current session state.
    pub fn replace_engine(&mut self, mut engine: Box<dyn SimulationEngine>) -> SessionResult<()> {
        apply_engine_config(engine.as_mut(), &self.engine_config)?;
        for (key, value) in &self.parameter_overrides {
            match engine.set_parameter(key, value) {
                Err(SimError::UnknownParameter(_)) => warn!(key = %key, "Parameter not supported by new engine"),
                other => other?,
            }
        }
        if let Some(phantom) = &self.phantom {
            phantom.install(engine.as_mut())?;
        }
        if let Some(excitation) = &self.excitation {
            engine.set_excitation(excitation.clone())?;
        }
        if let Some(profile) = &self.beam_profile {
            engine.set_beam_profile(profile.clone())?;
        }
        if let Some(seq) = &self.sequence {
            engine.set_scan_sequence(seq)?;
        }
        info!(old = self.engine.name(), new = engine.name(), "Engine replaced");
        self.engine = engine;
        Ok(())
    }

    pub fn total_num_scatterers(&self) -> usize {
        self.engine.total_num_scatterers()
    }

    pub fn debug_data(&self, key: &str) -> Option<Vec<f64>> {
        self.engine.debug_data(key)
    }

    // ─── Acquisition ─────────────────────────────────────────────────────

    /// Advance simulation time, then simulate.
    pub fn tick(&mut self) -> SessionResult<AcquisitionReport> {
        self.time.advance();
        self.simulate()
    }

    /// Acquire every enabled mode and dispatch the results.
    ///
    /// Nothing is dispatched unless every enabled acquisition succeeded. The
    /// call returns once tasks are queued, not when images are ready.
    pub fn simulate(&mut self) -> SessionResult<AcquisitionReport> {
        self.state = SessionState::Acquiring;
        let sim_time = self.time.current();

        let acquired = match self.acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                self.metrics.acquisition_failures.inc();
                warn!(error = %e, sim_time, "Acquisition failed, nothing dispatched");
                self.state = SessionState::Idle;
                return Err(e);
            }
        };

        self.state = SessionState::Dispatched;
        let report = self.dispatch(acquired, sim_time);
        self.state = SessionState::Idle;
        report
    }

    fn acquire(&mut self) -> SessionResult<Acquired> {
        let sequence = self.ensure_sequence()?.clone();

        let color = if self.color_enabled {
            let acq = run_color_doppler(self.engine.as_mut(), &sequence, self.packet_size, self.prf)?;
            self.metrics.color_acquisitions.inc_by(acq.packet_size() as u64);
            self.metrics
                .simulate_latency_ms
                .observe(acq.per_packet().as_secs_f64() * 1e3);
            Some(acq)
        } else {
            None
        };

        let bmode = if self.bmode_enabled {
            let acq = run_bmode(self.engine.as_mut(), &sequence)?;
            self.metrics.bmode_acquisitions.inc();
            self.metrics.simulate_latency_ms.observe(acq.elapsed.as_secs_f64() * 1e3);
            Some(acq)
        } else {
            None
        };

        Ok(Acquired { color, bmode })
    }

    fn dispatch(&mut self, acquired: Acquired, sim_time: f64) -> SessionResult<AcquisitionReport> {
        let mut report = AcquisitionReport {
            sim_time,
            bmode: None,
            color: None,
            tasks_submitted: 0,
            recorded: false,
        };

        if let Some(acq) = acquired.color {
            report.color = Some(ColorReport {
                packets: acq.packet_size(),
                avg_ms_per_packet: acq.per_packet().as_secs_f64() * 1e3,
            });
            self.sink.submit(WorkTask::ColorDoppler(ColorTask {
                geometry: self.geometry.clone(),
                frames: acq.frames,
                params: self.display.color,
                sim_time,
            }))?;
            report.tasks_submitted += 1;
        }

        if let Some(acq) = acquired.bmode {
            let elapsed_ms = acq.elapsed.as_secs_f64() * 1e3;
            let work = self.num_lines * self.engine.total_num_scatterers();
            report.bmode = Some(BModeReport {
                elapsed_ms,
                ns_per_scatterer_per_line: if work > 0 { elapsed_ms * 1e6 / work as f64 } else { 0.0 },
                radial_samples: acq.frame.num_samples(),
            });

            let recorded_frame = self.recording.then(|| acq.frame.clone());
            let mut params = self.display.bmode;
            if params.auto_normalize {
                params.normalization_const = self.feedback.get();
            }
            self.sink.submit(WorkTask::BMode(BModeTask {
                geometry: self.geometry.clone(),
                frame: acq.frame,
                params,
                sim_time,
            }))?;
            report.tasks_submitted += 1;

            if let Some(frame) = recorded_frame {
                self.accumulator.push(frame, sim_time);
                self.metrics.iq_buffer_frames.set(self.accumulator.len() as i64);
                report.recorded = true;
            }
        }

        debug!(
            sim_time,
            tasks = report.tasks_submitted,
            recorded = report.recorded,
            "Request dispatched"
        );
        Ok(report)
    }

    // ─── IQ buffer and replay ────────────────────────────────────────────

    /// Export the IQ buffer.
    ///
    /// The buffer is cleared after a successful export and after a shape
    /// mismatch. I/O failures leave it untouched.
    pub fn save_iq_buffer(&mut self, path: &Path) -> SessionResult<()> {
        let result = self.accumulator.export(path);
        match &result {
            Ok(()) => self.reset_iq_buffer(),
            Err(e @ SessionError::ShapeMismatch(_)) => {
                warn!(error = %e, "Inconsistent IQ buffer discarded");
                self.reset_iq_buffer();
            }
            Err(_) => {}
        }
        result
    }

    pub fn reset_iq_buffer(&mut self) {
        self.accumulator.clear();
        self.metrics.iq_buffer_frames.set(0);
    }

    /// Submit one B-mode task per frame stored in an IQ container.
    pub fn replay_iq(&mut self, path: &Path) -> SessionResult<usize> {
        let recording = read_iq_frames(path)?;
        let times = recording.frame_times.unwrap_or_default();
        let count = recording.frames.len();
        for (idx, frame) in recording.frames.into_iter().enumerate() {
            let mut params = self.display.bmode;
            if params.auto_normalize {
                params.normalization_const = self.feedback.get();
            }
            self.sink.submit(WorkTask::BMode(BModeTask {
                geometry: self.geometry.clone(),
                frame,
                params,
                sim_time: times.get(idx).copied().unwrap_or(self.time.current()),
            }))?;
        }
        info!(path = %path.display(), frames = count, "IQ replay submitted");
        Ok(count)
    }
}
