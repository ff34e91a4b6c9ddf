//! CPU reference simulator
//!
//! Point-scatterer model evaluated independently per scan-line:
//!
//! ```text
//! scatterers ──► project into line frame ──► deposit at 2·r/c ──► * baseband pulse ──► decimate ──► + noise
//!                (spline positions at the      (optional sub-sample     (demodulated
//!                 line timestamp)               phase correction)        excitation)
//! ```
//!
//! Convolving with the demodulated excitation is equivalent to convolving
//! the RF trace with the pulse and mixing down afterwards. The baseband pulse
//! is low-pass filtered once up front, so only the decimated output samples
//! are ever computed.
//!
//! Lines are simulated in parallel on a dedicated rayon pool.

use echoscan_core::{IqSample, RawIqFrame, ScanLine, ScanSequence};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::{SimError, SimResult, SimulationEngine};
use crate::scatterers::{BeamProfile, ExcitationSignal, FixedScatterers, SplineScatterers};

/// Multi-threaded CPU implementation of [`SimulationEngine`]
pub struct ReferenceSimulator {
    sound_speed: f64,
    radial_decimation: usize,
    noise_amplitude: f64,
    phase_delay: bool,
    verbose: bool,
    noise_seed: Option<u64>,
    num_threads: usize,
    pool: rayon::ThreadPool,
    simulate_calls: u64,

    scan_sequence: Option<ScanSequence>,
    fixed: Vec<Arc<FixedScatterers>>,
    spline: Vec<Arc<SplineScatterers>>,
    excitation: Option<ExcitationSignal>,
    beam_profile: BeamProfile,
}

impl std::fmt::Debug for ReferenceSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSimulator")
            .field("sound_speed", &self.sound_speed)
            .field("radial_decimation", &self.radial_decimation)
            .field("noise_amplitude", &self.noise_amplitude)
            .field("phase_delay", &self.phase_delay)
            .field("num_threads", &self.num_threads)
            .field("num_scatterers", &self.total_num_scatterers())
            .finish()
    }
}

fn build_pool(num_threads: usize) -> SimResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("sim-worker-{}", i))
        .build()
        .map_err(|e| SimError::Creation(e.to_string()))
}

fn invalid(key: &str, value: &str) -> SimError {
    SimError::InvalidParameter {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Demodulated and low-pass filtered excitation.
///
/// The low-pass is a centred boxcar spanning one carrier period, which
/// nulls the image at twice the demodulation frequency.
pub fn baseband_pulse(exc: &ExcitationSignal) -> Vec<Complex64> {
    let omega = 2.0 * PI * exc.demod_freq / exc.sampling_frequency;
    let center = exc.center_index as f64;
    let mixed: Vec<Complex64> = exc
        .samples
        .iter()
        .enumerate()
        .map(|(k, &v)| Complex64::from_polar(v as f64, -omega * (k as f64 - center)))
        .collect();

    if mixed.is_empty() {
        return mixed;
    }
    let width = if exc.demod_freq > 0.0 {
        ((exc.sampling_frequency / exc.demod_freq).round() as usize).clamp(1, mixed.len())
    } else {
        1
    };
    if width == 1 {
        return mixed;
    }
    let half = width / 2;
    let len = mixed.len() as i64;
    (0..len)
        .map(|k| {
            let start = k - half as i64;
            let sum: Complex64 = (start..start + width as i64)
                .filter(|j| (0..len).contains(j))
                .map(|j| mixed[j as usize])
                .sum();
            sum / width as f64
        })
        .collect()
}

/// One scatterer's echo expressed in line coordinates
struct Echo {
    radial: f64,
    lateral: f64,
    elevational: f64,
    amplitude: f32,
}

impl ReferenceSimulator {
    /// Create a simulator using all available cores.
    pub fn new() -> SimResult<Self> {
        Ok(Self {
            sound_speed: echoscan_core::DEFAULT_SOUND_SPEED,
            radial_decimation: 15,
            noise_amplitude: 0.0,
            phase_delay: true,
            verbose: false,
            noise_seed: None,
            num_threads: 0,
            pool: build_pool(0)?,
            simulate_calls: 0,
            scan_sequence: None,
            fixed: Vec::new(),
            spline: Vec::new(),
            excitation: None,
            beam_profile: BeamProfile::default(),
        })
    }

    pub fn sound_speed(&self) -> f64 {
        self.sound_speed
    }

    pub fn radial_decimation(&self) -> usize {
        self.radial_decimation
    }

    pub fn noise_amplitude(&self) -> f64 {
        self.noise_amplitude
    }

    pub fn beam_profile(&self) -> &BeamProfile {
        &self.beam_profile
    }

    /// IQ samples produced per line for a line of `line_length` meters
    pub fn samples_per_line(&self, line_length: f64, excitation: &ExcitationSignal) -> usize {
        let rf_samples = (2.0 * line_length / self.sound_speed * excitation.sampling_frequency)
            .floor() as usize
            + 1;
        rf_samples.div_ceil(self.radial_decimation)
    }

    fn collect_echoes(&self, line: &ScanLine, line_length: f64) -> Vec<Echo> {
        let elevation_dir = line.direction.cross(&line.lateral_dir);
        let mut echoes = Vec::new();
        let mut push = |pos: echoscan_core::Vector3, amplitude: f32| {
            let d = pos - line.origin;
            let radial = d.dot(&line.direction);
            if (0.0..=line_length).contains(&radial) {
                echoes.push(Echo {
                    radial,
                    lateral: d.dot(&line.lateral_dir),
                    elevational: d.dot(&elevation_dir),
                    amplitude,
                });
            }
        };

        for set in &self.fixed {
            for s in &set.scatterers {
                push(s.position, s.amplitude);
            }
        }
        for set in &self.spline {
            if let Some((span, basis)) = set.basis(line.timestamp) {
                for idx in 0..set.len() {
                    push(set.position_with_basis(idx, span, &basis), set.amplitude(idx));
                }
            }
        }
        echoes
    }

    fn simulate_line(
        &self,
        line: &ScanLine,
        line_length: f64,
        excitation: &[Complex64],
        exc: &ExcitationSignal,
        num_samples: usize,
        noise_seed: u64,
    ) -> Vec<IqSample> {
        let fs = exc.sampling_frequency;
        let omega = 2.0 * PI * exc.demod_freq / fs;
        let decim = self.radial_decimation as i64;
        let center = exc.center_index as i64;
        let exc_len = excitation.len() as i64;
        let mut out = vec![Complex64::new(0.0, 0.0); num_samples];

        for echo in self.collect_echoes(line, line_length) {
            let weight = self.beam_profile.weight(
                echo.radial as f32,
                echo.lateral as f32,
                echo.elevational as f32,
            );
            if weight == 0.0 || echo.amplitude == 0.0 {
                continue;
            }
            let delay = 2.0 * echo.radial / self.sound_speed * fs;
            let m = delay.round();
            let phase = if self.phase_delay { delay } else { m };
            let value = Complex64::from_polar((echo.amplitude * weight) as f64, -omega * phase);

            // output q receives excitation tap k = q*D - m + center
            let m = m as i64;
            let q_first = ((m - center).max(0) + decim - 1) / decim;
            let q_last = ((m - center + exc_len - 1).div_euclid(decim)).min(num_samples as i64 - 1);
            for q in q_first..=q_last {
                let k = q * decim - m + center;
                out[q as usize] += value * excitation[k as usize];
            }
        }

        if self.noise_amplitude > 0.0 {
            let mut rng = StdRng::seed_from_u64(noise_seed);
            if let Ok(normal) = Normal::new(0.0, self.noise_amplitude) {
                for s in out.iter_mut() {
                    *s += Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng));
                }
            }
        }

        out.into_iter()
            .map(|s| IqSample::new(s.re as f32, s.im as f32))
            .collect()
    }
}

impl SimulationEngine for ReferenceSimulator {
    fn name(&self) -> &str {
        "cpu-reference"
    }

    fn set_scan_sequence(&mut self, sequence: &ScanSequence) -> SimResult<()> {
        if sequence.num_lines() == 0 {
            return Err(SimError::Simulation("scan sequence has no lines".to_string()));
        }
        self.scan_sequence = Some(sequence.clone());
        Ok(())
    }

    fn simulate_lines(&mut self) -> SimResult<RawIqFrame> {
        let sequence = self.scan_sequence.as_ref().ok_or(SimError::NoScanSequence)?;
        let exc = self
            .excitation
            .as_ref()
            .ok_or_else(|| SimError::Simulation("no excitation signal configured".to_string()))?;

        let baseband = baseband_pulse(exc);
        let line_length = sequence.line_length();
        let num_samples = self.samples_per_line(line_length, exc);
        let base_seed = self.noise_seed.unwrap_or_else(rand::random::<u64>);
        let call = self.simulate_calls;

        let lines: Vec<Vec<IqSample>> = self.pool.install(|| {
            sequence
                .lines()
                .par_iter()
                .enumerate()
                .map(|(i, line)| {
                    let seed = base_seed
                        .wrapping_add(call.wrapping_mul(0x9E37_79B9_7F4A_7C15))
                        .wrapping_add(i as u64);
                    self.simulate_line(line, line_length, &baseband, exc, num_samples, seed)
                })
                .collect()
        });

        self.simulate_calls += 1;
        if self.verbose {
            debug!(
                lines = lines.len(),
                samples = num_samples,
                scatterers = self.total_num_scatterers(),
                "Simulated lines"
            );
        }
        RawIqFrame::from_lines(lines).map_err(|e| SimError::Simulation(e.to_string()))
    }

    fn total_num_scatterers(&self) -> usize {
        self.fixed.iter().map(|s| s.len()).sum::<usize>()
            + self.spline.iter().map(|s| s.len()).sum::<usize>()
    }

    fn set_parameter(&mut self, key: &str, value: &str) -> SimResult<()> {
        match key {
            "sound_speed" => {
                let c: f64 = value.parse().map_err(|_| invalid(key, value))?;
                if !(c.is_finite() && c > 0.0) {
                    return Err(invalid(key, value));
                }
                self.sound_speed = c;
            }
            "radial_decimation" => {
                let d: usize = value.parse().map_err(|_| invalid(key, value))?;
                if d == 0 {
                    return Err(invalid(key, value));
                }
                self.radial_decimation = d;
            }
            "noise_amplitude" => {
                let a: f64 = value.parse().map_err(|_| invalid(key, value))?;
                if !(a.is_finite() && a >= 0.0) {
                    return Err(invalid(key, value));
                }
                self.noise_amplitude = a;
            }
            "num_cpu_cores" => {
                let n: usize = value.parse().map_err(|_| invalid(key, value))?;
                if n != self.num_threads {
                    self.pool = build_pool(n)?;
                    self.num_threads = n;
                }
            }
            "phase_delay" => {
                self.phase_delay = match value {
                    "on" | "true" | "1" => true,
                    "off" | "false" | "0" => false,
                    _ => return Err(invalid(key, value)),
                };
            }
            "verbose" => {
                self.verbose = match value {
                    "on" | "true" | "1" => true,
                    "off" | "false" | "0" => false,
                    _ => return Err(invalid(key, value)),
                };
            }
            "noise_seed" => {
                self.noise_seed = match value {
                    "random" => None,
                    v => Some(v.parse().map_err(|_| invalid(key, value))?),
                };
            }
            _ => return Err(SimError::UnknownParameter(key.to_string())),
        }
        debug!(key, value, "Simulator parameter set");
        Ok(())
    }

    fn clear_fixed_scatterers(&mut self) {
        self.fixed.clear();
    }

    fn clear_spline_scatterers(&mut self) {
        self.spline.clear();
    }

    fn add_fixed_scatterers(&mut self, scatterers: Arc<FixedScatterers>) -> SimResult<()> {
        info!(count = scatterers.len(), "Adding fixed scatterers");
        self.fixed.push(scatterers);
        Ok(())
    }

    fn add_spline_scatterers(&mut self, scatterers: Arc<SplineScatterers>) -> SimResult<()> {
        info!(
            count = scatterers.len(),
            degree = scatterers.degree(),
            control_points = scatterers.num_control_points(),
            "Adding spline scatterers"
        );
        self.spline.push(scatterers);
        Ok(())
    }

    fn set_excitation(&mut self, excitation: ExcitationSignal) -> SimResult<()> {
        excitation.validate()?;
        self.excitation = Some(excitation);
        Ok(())
    }

    fn set_beam_profile(&mut self, profile: BeamProfile) -> SimResult<()> {
        info!(kind = profile.kind(), "Beam profile configured");
        self.beam_profile = profile;
        Ok(())
    }

    fn debug_data(&self, key: &str) -> Option<Vec<f64>> {
        match key {
            "excitation" => self
                .excitation
                .as_ref()
                .map(|e| e.samples.iter().map(|&v| v as f64).collect()),
            "line_timestamps" => self.scan_sequence.as_ref().map(|s| s.timestamps()),
            "spline_time_limits" => {
                let limits: Vec<f64> = self
                    .spline
                    .iter()
                    .filter_map(|s| s.time_limits())
                    .flat_map(|(lo, hi)| [lo, hi])
                    .collect();
                Some(limits)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scatterers::FixedScatterer;
    use echoscan_core::{ProbeMotion, ScanGeometry, ScanSequenceBuilder, Vector3};

    fn sequence(num_lines: usize) -> ScanSequence {
        let geometry = ScanGeometry::Linear { width: 0.02, range_max: 0.04 };
        ScanSequenceBuilder::default()
            .build(&geometry, num_lines, 0.0, &ProbeMotion::default(), true)
            .unwrap()
    }

    fn simulator() -> ReferenceSimulator {
        let mut sim = ReferenceSimulator::new().unwrap();
        sim.set_parameter("num_cpu_cores", "2").unwrap();
        sim.set_excitation(ExcitationSignal::gaussian_pulse(2.5e6, 0.5, 50e6).unwrap())
            .unwrap();
        sim
    }

    fn point_at(z: f64) -> Arc<FixedScatterers> {
        Arc::new(FixedScatterers::new(vec![FixedScatterer {
            position: Vector3::new(0.0, 0.0, z),
            amplitude: 1.0,
        }]))
    }

    #[test]
    fn test_baseband_pulse_is_smooth() {
        let exc = ExcitationSignal::gaussian_pulse(2.5e6, 0.5, 50e6).unwrap();
        let bb = baseband_pulse(&exc);
        assert_eq!(bb.len(), exc.samples.len());
        // the carrier is removed, leaving roughly half the envelope
        let peak = bb[exc.center_index].norm();
        assert!((peak - 0.5).abs() < 0.1, "peak {}", peak);
        let c = exc.center_index;
        assert!(bb[c + 3].norm() < peak && bb[c + 3].norm() > 0.8 * peak);
    }

    #[test]
    fn test_empty_excitation_rejected() {
        let empty = ExcitationSignal {
            samples: Vec::new(),
            sampling_frequency: 50e6,
            center_index: 0,
            demod_freq: 2.5e6,
        };
        assert!(baseband_pulse(&empty).is_empty());

        let mut sim = ReferenceSimulator::new().unwrap();
        assert!(matches!(
            sim.set_excitation(empty),
            Err(SimError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_requires_sequence_and_excitation() {
        let mut sim = ReferenceSimulator::new().unwrap();
        assert_eq!(sim.simulate_lines().unwrap_err(), SimError::NoScanSequence);
        sim.set_scan_sequence(&sequence(4)).unwrap();
        assert!(matches!(sim.simulate_lines(), Err(SimError::Simulation(_))));
    }

    #[test]
    fn test_frame_shape() {
        let mut sim = simulator();
        sim.set_scan_sequence(&sequence(8)).unwrap();
        let frame = sim.simulate_lines().unwrap();
        let exc = ExcitationSignal::gaussian_pulse(2.5e6, 0.5, 50e6).unwrap();
        assert_eq!(frame.num_lines(), 8);
        assert_eq!(frame.num_samples(), sim.samples_per_line(0.04, &exc));
        // no scatterers, no noise
        assert_eq!(frame.max_magnitude(), 0.0);
    }

    #[test]
    fn test_point_scatterer_echo_depth() {
        let mut sim = simulator();
        sim.add_fixed_scatterers(point_at(0.02)).unwrap();
        sim.set_scan_sequence(&sequence(5)).unwrap();
        let frame = sim.simulate_lines().unwrap();

        // centre line passes through the scatterer
        let line = frame.line(2).unwrap();
        let (peak, _) = line
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.norm()))
            .fold((0, 0.0_f32), |best, cur| if cur.1 > best.1 { cur } else { best });
        let expected = 2.0 * 0.02 / 1540.0 * 50e6 / 15.0;
        assert!((peak as f64 - expected).abs() <= 1.5, "peak {} expected {}", peak, expected);

        // off-axis lines see a much weaker echo
        let edge = frame.line(0).unwrap().iter().map(|s| s.norm()).fold(0.0_f32, f32::max);
        assert!(edge < line[peak].norm() * 1e-3);
    }

    #[test]
    fn test_scatterers_beyond_line_ignored() {
        let mut sim = simulator();
        sim.add_fixed_scatterers(point_at(0.06)).unwrap();
        sim.set_scan_sequence(&sequence(3)).unwrap();
        assert_eq!(sim.simulate_lines().unwrap().max_magnitude(), 0.0);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let run = || {
            let mut sim = simulator();
            sim.set_parameter("noise_amplitude", "0.1").unwrap();
            sim.set_parameter("noise_seed", "7").unwrap();
            sim.set_scan_sequence(&sequence(4)).unwrap();
            sim.simulate_lines().unwrap()
        };
        let a = run();
        assert!(a.max_magnitude() > 0.0);
        assert_eq!(a, run());
    }

    #[test]
    fn test_spline_scatterer_follows_timestamp() {
        let spline = SplineScatterers::new(
            1,
            vec![0.0, 0.0, 1.0, 1.0],
            vec![vec![Vector3::new(0.0, 0.0, 0.01), Vector3::new(0.0, 0.0, 0.03)]],
            vec![1.0],
        )
        .unwrap();
        let mut sim = simulator();
        sim.add_spline_scatterers(Arc::new(spline)).unwrap();
        assert_eq!(sim.total_num_scatterers(), 1);

        let peak_at = |sim: &mut ReferenceSimulator, seq: &ScanSequence| {
            sim.set_scan_sequence(seq).unwrap();
            let frame = sim.simulate_lines().unwrap();
            let line = frame.line(0).unwrap().to_vec();
            (0..line.len()).max_by(|&a, &b| line[a].norm().total_cmp(&line[b].norm())).unwrap()
        };
        let seq = sequence(1);
        let early = peak_at(&mut sim, &seq);
        let late = peak_at(&mut sim, &seq.with_time_offset(1.0));
        assert!(late > early);
    }

    #[test]
    fn test_parameters() {
        let mut sim = ReferenceSimulator::new().unwrap();
        sim.set_parameter("sound_speed", "1600").unwrap();
        assert_eq!(sim.sound_speed(), 1600.0);
        sim.set_parameter("phase_delay", "off").unwrap();
        sim.set_parameter("verbose", "true").unwrap();
        assert!(matches!(
            sim.set_parameter("radial_decimation", "0"),
            Err(SimError::InvalidParameter { .. })
        ));
        assert!(matches!(
            sim.set_parameter("noise_amplitude", "-1"),
            Err(SimError::InvalidParameter { .. })
        ));
        assert_eq!(
            sim.set_parameter("bogus", "1"),
            Err(SimError::UnknownParameter("bogus".to_string()))
        );
    }

    #[test]
    fn test_clear_scatterers() {
        let mut sim = simulator();
        sim.add_fixed_scatterers(point_at(0.01)).unwrap();
        sim.add_fixed_scatterers(point_at(0.02)).unwrap();
        assert_eq!(sim.total_num_scatterers(), 2);
        sim.clear_fixed_scatterers();
        assert_eq!(sim.total_num_scatterers(), 0);
    }

    #[test]
    fn test_debug_data() {
        let mut sim = simulator();
        sim.set_scan_sequence(&sequence(3)).unwrap();
        assert_eq!(sim.debug_data("line_timestamps"), Some(vec![0.0, 0.0, 0.0]));
        assert!(sim.debug_data("excitation").is_some());
        assert!(sim.debug_data("nope").is_none());
    }
}
