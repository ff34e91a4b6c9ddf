//! Phantom, beam and pulse models consumed by the simulation engine
//!
//! - [`FixedScatterers`]: static point reflectors
//! - [`SplineScatterers`]: reflectors moving along B-spline trajectories that
//!   share one knot vector and degree
//! - [`BeamProfile`]: transducer sensitivity, analytical or tabulated
//! - [`ExcitationSignal`]: transmitted RF pulse and demodulation frequency

use echoscan_core::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::engine::{SimError, SimResult};

/// A static point reflector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedScatterer {
    pub position: Vector3,
    pub amplitude: f32,
}

/// A set of static reflectors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixedScatterers {
    pub scatterers: Vec<FixedScatterer>,
}

impl FixedScatterers {
    pub fn new(scatterers: Vec<FixedScatterer>) -> Self {
        Self { scatterers }
    }

    pub fn len(&self) -> usize {
        self.scatterers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scatterers.is_empty()
    }
}

/// Reflectors moving along B-spline curves.
///
/// All scatterers share the knot vector and degree and have the same number
/// of control points. Positions are defined for `t` within
/// [`SplineScatterers::time_limits`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineScatterers {
    degree: usize,
    knots: Vec<f64>,
    control_points: Vec<Vec<Vector3>>,
    amplitudes: Vec<f32>,
}

impl SplineScatterers {
    pub fn new(
        degree: usize,
        knots: Vec<f64>,
        control_points: Vec<Vec<Vector3>>,
        amplitudes: Vec<f32>,
    ) -> SimResult<Self> {
        if amplitudes.len() != control_points.len() {
            return Err(SimError::InvalidParameter {
                key: "amplitudes".to_string(),
                value: format!(
                    "{} amplitudes for {} scatterers",
                    amplitudes.len(),
                    control_points.len()
                ),
            });
        }
        let num_cs = control_points.first().map_or(0, |c| c.len());
        if control_points.iter().any(|c| c.len() != num_cs) {
            return Err(SimError::InvalidParameter {
                key: "control_points".to_string(),
                value: "scatterers have differing control point counts".to_string(),
            });
        }
        if !control_points.is_empty() {
            if num_cs <= degree {
                return Err(SimError::InvalidParameter {
                    key: "spline_degree".to_string(),
                    value: format!("degree {} needs more than {} control points", degree, num_cs),
                });
            }
            if knots.len() != num_cs + degree + 1 {
                return Err(SimError::InvalidParameter {
                    key: "knot_vector".to_string(),
                    value: format!(
                        "expected {} knots, got {}",
                        num_cs + degree + 1,
                        knots.len()
                    ),
                });
            }
        }
        if knots.windows(2).any(|w| !(w[0] <= w[1])) {
            return Err(SimError::InvalidParameter {
                key: "knot_vector".to_string(),
                value: "knots must be non-decreasing".to_string(),
            });
        }
        Ok(Self { degree, knots, control_points, amplitudes })
    }

    pub fn len(&self) -> usize {
        self.control_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.control_points.is_empty()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn num_control_points(&self) -> usize {
        self.control_points.first().map_or(0, |c| c.len())
    }

    pub fn control_points(&self, idx: usize) -> Option<&[Vector3]> {
        self.control_points.get(idx).map(|c| c.as_slice())
    }

    pub fn amplitude(&self, idx: usize) -> f32 {
        self.amplitudes.get(idx).copied().unwrap_or(0.0)
    }

    /// Valid parameter range `[knots[degree], knots[num_cs]]`
    pub fn time_limits(&self) -> Option<(f64, f64)> {
        let num_cs = self.num_control_points();
        if num_cs == 0 {
            return None;
        }
        Some((self.knots[self.degree], self.knots[num_cs]))
    }

    /// Knot span index and the `degree + 1` non-zero basis values at `t`.
    ///
    /// `t` is clamped into the valid range.
    pub fn basis(&self, t: f64) -> Option<(usize, Vec<f64>)> {
        let (t_min, t_max) = self.time_limits()?;
        let p = self.degree;
        let num_cs = self.num_control_points();
        let t = t.clamp(t_min, t_max);
        let u = &self.knots;

        let mut span = p;
        while span + 1 < num_cs && u[span + 1] <= t {
            span += 1;
        }

        // Cox-de Boor, triangular scheme
        let mut n = vec![0.0; p + 1];
        let mut left = vec![0.0; p + 1];
        let mut right = vec![0.0; p + 1];
        n[0] = 1.0;
        for j in 1..=p {
            left[j] = t - u[span + 1 - j];
            right[j] = u[span + j] - t;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom == 0.0 { 0.0 } else { n[r] / denom };
                n[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            n[j] = saved;
        }
        Some((span, n))
    }

    /// Position of scatterer `idx` given precomputed basis values.
    pub fn position_with_basis(&self, idx: usize, span: usize, basis: &[f64]) -> Vector3 {
        let cs = &self.control_points[idx];
        let first = span - self.degree;
        basis
            .iter()
            .enumerate()
            .fold(Vector3::zero(), |acc, (i, &w)| acc + cs[first + i] * w)
    }

    /// Position of scatterer `idx` at time `t`.
    pub fn position_at(&self, idx: usize, t: f64) -> Option<Vector3> {
        if idx >= self.len() {
            return None;
        }
        let (span, basis) = self.basis(t)?;
        Some(self.position_with_basis(idx, span, &basis))
    }
}

/// Gaussian beam cross-section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianProfile {
    pub sigma_lateral: f32,
    pub sigma_elevational: f32,
}

impl GaussianProfile {
    pub fn new(sigma_lateral: f32, sigma_elevational: f32) -> Self {
        Self { sigma_lateral, sigma_elevational }
    }

    #[inline]
    pub fn weight(&self, _radial: f32, lateral: f32, elevational: f32) -> f32 {
        let sl = self.sigma_lateral.max(f32::EPSILON);
        let se = self.sigma_elevational.max(f32::EPSILON);
        (-(lateral * lateral) / (2.0 * sl * sl) - (elevational * elevational) / (2.0 * se * se)).exp()
    }
}

/// Tabulated beam sensitivity on a regular `[radial, lateral, elevational]` grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LutProfile {
    /// `(r_min, r_max, l_min, l_max, e_min, e_max)` in meters
    extents: [f32; 6],
    /// Grid size `(R, L, E)`
    dims: [usize; 3],
    /// Row-major `[r][l][e]`
    samples: Vec<f32>,
}

impl LutProfile {
    pub fn new(extents: [f32; 6], dims: [usize; 3], samples: Vec<f32>) -> SimResult<Self> {
        let expected = dims[0] * dims[1] * dims[2];
        if expected == 0 || samples.len() != expected {
            return Err(SimError::InvalidParameter {
                key: "beam_profile".to_string(),
                value: format!("{} samples for grid {:?}", samples.len(), dims),
            });
        }
        for axis in 0..3 {
            let (lo, hi) = (extents[2 * axis], extents[2 * axis + 1]);
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(SimError::InvalidParameter {
                    key: "extents".to_string(),
                    value: format!("axis {} range {}..{}", axis, lo, hi),
                });
            }
        }
        Ok(Self { extents, dims, samples })
    }

    pub fn extents(&self) -> [f32; 6] {
        self.extents
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Fractional grid coordinate along one axis, `None` outside the table
    fn grid_coord(&self, axis: usize, value: f32) -> Option<f32> {
        let (lo, hi) = (self.extents[2 * axis], self.extents[2 * axis + 1]);
        if value < lo || value > hi {
            return None;
        }
        let n = self.dims[axis];
        if n == 1 {
            return Some(0.0);
        }
        Some((value - lo) / (hi - lo) * (n - 1) as f32)
    }

    #[inline]
    fn at(&self, r: usize, l: usize, e: usize) -> f32 {
        self.samples[(r * self.dims[1] + l) * self.dims[2] + e]
    }

    /// Trilinear interpolation; zero outside the tabulated region
    pub fn weight(&self, radial: f32, lateral: f32, elevational: f32) -> f32 {
        let (Some(gr), Some(gl), Some(ge)) = (
            self.grid_coord(0, radial),
            self.grid_coord(1, lateral),
            self.grid_coord(2, elevational),
        ) else {
            return 0.0;
        };

        let split = |g: f32, n: usize| {
            let i0 = (g.floor() as usize).min(n - 1);
            let i1 = (i0 + 1).min(n - 1);
            (i0, i1, g - i0 as f32)
        };
        let (r0, r1, fr) = split(gr, self.dims[0]);
        let (l0, l1, fl) = split(gl, self.dims[1]);
        let (e0, e1, fe) = split(ge, self.dims[2]);

        let lerp = |a: f32, b: f32, f: f32| a + (b - a) * f;
        let c00 = lerp(self.at(r0, l0, e0), self.at(r0, l0, e1), fe);
        let c01 = lerp(self.at(r0, l1, e0), self.at(r0, l1, e1), fe);
        let c10 = lerp(self.at(r1, l0, e0), self.at(r1, l0, e1), fe);
        let c11 = lerp(self.at(r1, l1, e0), self.at(r1, l1, e1), fe);
        lerp(lerp(c00, c01, fl), lerp(c10, c11, fl), fr)
    }
}

/// Beam profile, analytical or lookup-table based
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeamProfile {
    Analytical(GaussianProfile),
    Lookup(LutProfile),
}

impl Default for BeamProfile {
    fn default() -> Self {
        BeamProfile::Analytical(GaussianProfile::new(1e-3, 1e-3))
    }
}

impl BeamProfile {
    pub fn kind(&self) -> &'static str {
        match self {
            BeamProfile::Analytical(_) => "analytical",
            BeamProfile::Lookup(_) => "lookup",
        }
    }

    /// Sensitivity at a point given in line coordinates (meters)
    #[inline]
    pub fn weight(&self, radial: f32, lateral: f32, elevational: f32) -> f32 {
        match self {
            BeamProfile::Analytical(g) => g.weight(radial, lateral, elevational),
            BeamProfile::Lookup(lut) => lut.weight(radial, lateral, elevational),
        }
    }
}

/// Transmitted RF pulse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcitationSignal {
    pub samples: Vec<f32>,
    /// RF sampling frequency (Hz)
    pub sampling_frequency: f64,
    /// Sample index aligned with the reflector position
    pub center_index: usize,
    /// Demodulation frequency (Hz)
    pub demod_freq: f64,
}

impl ExcitationSignal {
    pub fn new(
        samples: Vec<f32>,
        sampling_frequency: f64,
        center_index: usize,
        demod_freq: f64,
    ) -> SimResult<Self> {
        let exc = Self { samples, sampling_frequency, center_index, demod_freq };
        exc.validate()?;
        Ok(exc)
    }

    /// Check a signal that may have been built field by field.
    pub fn validate(&self) -> SimResult<()> {
        if self.samples.is_empty() {
            return Err(SimError::InvalidParameter {
                key: "samples".to_string(),
                value: "excitation is empty".to_string(),
            });
        }
        if !(self.sampling_frequency.is_finite() && self.sampling_frequency > 0.0) {
            return Err(SimError::InvalidParameter {
                key: "sampling_frequency".to_string(),
                value: self.sampling_frequency.to_string(),
            });
        }
        if self.center_index >= self.samples.len() {
            return Err(SimError::InvalidParameter {
                key: "center_index".to_string(),
                value: format!("{} >= {}", self.center_index, self.samples.len()),
            });
        }
        if !self.demod_freq.is_finite() {
            return Err(SimError::InvalidParameter {
                key: "demod_freq".to_string(),
                value: self.demod_freq.to_string(),
            });
        }
        Ok(())
    }

    /// Gaussian-windowed sinusoid at `center_freq` with the given
    /// fractional -6 dB bandwidth, demodulated at `center_freq`.
    pub fn gaussian_pulse(
        center_freq: f64,
        fractional_bandwidth: f64,
        sampling_frequency: f64,
    ) -> SimResult<Self> {
        if !(center_freq > 0.0 && fractional_bandwidth > 0.0 && sampling_frequency > 0.0) {
            return Err(SimError::InvalidParameter {
                key: "excitation".to_string(),
                value: format!(
                    "fc={} bw={} fs={}",
                    center_freq, fractional_bandwidth, sampling_frequency
                ),
            });
        }
        let bw = fractional_bandwidth * center_freq;
        let sigma_f = bw / (2.0 * (2.0 * 2.0_f64.ln()).sqrt());
        let sigma_t = 1.0 / (2.0 * PI * sigma_f);
        let half = (3.0 * sigma_t * sampling_frequency).ceil() as usize;
        let samples = (0..=2 * half)
            .map(|i| {
                let t = (i as f64 - half as f64) / sampling_frequency;
                ((-t * t / (2.0 * sigma_t * sigma_t)).exp() * (2.0 * PI * center_freq * t).cos()) as f32
            })
            .collect();
        Self::new(samples, sampling_frequency, half, center_freq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn linear_spline() -> SplineScatterers {
        // degree 1, two control points: straight line from origin to (0,0,0.01)
        SplineScatterers::new(
            1,
            vec![0.0, 0.0, 1.0, 1.0],
            vec![vec![Vector3::zero(), Vector3::new(0.0, 0.0, 0.01)]],
            vec![1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_spline_time_limits() {
        assert_eq!(linear_spline().time_limits(), Some((0.0, 1.0)));
    }

    #[test]
    fn test_linear_spline_interpolates() {
        let s = linear_spline();
        assert_abs_diff_eq!(s.position_at(0, 0.5).unwrap().z, 0.005, epsilon = 1e-12);
        assert_abs_diff_eq!(s.position_at(0, 1.0).unwrap().z, 0.01, epsilon = 1e-12);
        // clamped outside the valid range
        assert_abs_diff_eq!(s.position_at(0, -3.0).unwrap().z, 0.0, epsilon = 1e-12);
        assert!(s.position_at(1, 0.5).is_none());
    }

    #[test]
    fn test_cubic_basis_partition_of_unity() {
        let knots = vec![0.0, 0.0, 0.0, 0.0, 0.4, 0.6, 1.0, 1.0, 1.0, 1.0];
        let cs = vec![vec![Vector3::zero(); 6]];
        let s = SplineScatterers::new(3, knots, cs, vec![1.0]).unwrap();
        for t in [0.0, 0.1, 0.4, 0.55, 0.99, 1.0] {
            let (_, basis) = s.basis(t).unwrap();
            assert_abs_diff_eq!(basis.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spline_validation() {
        let cs = vec![vec![Vector3::zero(); 2]];
        assert!(SplineScatterers::new(1, vec![0.0, 1.0], cs.clone(), vec![1.0]).is_err());
        assert!(SplineScatterers::new(1, vec![0.0, 0.0, 1.0, 1.0], cs.clone(), vec![]).is_err());
        assert!(SplineScatterers::new(1, vec![0.0, 1.0, 0.5, 1.0], cs, vec![1.0]).is_err());
    }

    #[test]
    fn test_gaussian_profile() {
        let g = GaussianProfile::new(1e-3, 2e-3);
        assert_abs_diff_eq!(g.weight(0.05, 0.0, 0.0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(g.weight(0.05, 1e-3, 0.0), (-0.5_f32).exp(), epsilon = 1e-6);
        assert!(g.weight(0.05, 0.0, 2e-3) > g.weight(0.05, 2e-3, 0.0));
    }

    #[test]
    fn test_lut_profile_interpolation() {
        // 2x2x2 grid: value equals the radial index
        let samples = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let lut = LutProfile::new([0.0, 0.1, -0.01, 0.01, -0.01, 0.01], [2, 2, 2], samples).unwrap();
        assert_abs_diff_eq!(lut.weight(0.05, 0.0, 0.0), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(lut.weight(0.1, 0.01, -0.01), 1.0, epsilon = 1e-6);
        assert_eq!(lut.weight(0.2, 0.0, 0.0), 0.0);

        let profile = BeamProfile::Lookup(lut);
        assert_eq!(profile.kind(), "lookup");
    }

    #[test]
    fn test_lut_rejects_bad_shape() {
        assert!(LutProfile::new([0.0, 0.1, -0.01, 0.01, -0.01, 0.01], [2, 2, 2], vec![0.0; 7]).is_err());
        assert!(LutProfile::new([0.1, 0.0, -0.01, 0.01, -0.01, 0.01], [1, 1, 1], vec![0.0]).is_err());
    }

    #[test]
    fn test_gaussian_pulse() {
        let exc = ExcitationSignal::gaussian_pulse(2.5e6, 0.5, 50e6).unwrap();
        assert_eq!(exc.samples.len(), 2 * exc.center_index + 1);
        assert_abs_diff_eq!(exc.samples[exc.center_index], 1.0, epsilon = 1e-6);
        assert_eq!(exc.demod_freq, 2.5e6);
    }

    #[test]
    fn test_excitation_validation() {
        assert!(ExcitationSignal::new(vec![], 50e6, 0, 2.5e6).is_err());
        assert!(ExcitationSignal::new(vec![1.0], 0.0, 0, 2.5e6).is_err());
        assert!(ExcitationSignal::new(vec![1.0, 0.5], 50e6, 2, 2.5e6).is_err());
    }
}
