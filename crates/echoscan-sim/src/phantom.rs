//! Scatterer phantoms
//!
//! A phantom is either loaded from a container or generated: uniform speckle
//! filling the scanned region plus a cylindrical vessel whose scatterers
//! flow laterally along straight spline trajectories.

use echoscan_core::config::PhantomConfig;
use echoscan_core::{ScanGeometry, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::container::{Container, ContainerResult};
use crate::datasets::{load_fixed_scatterers, load_spline_scatterers};
use crate::engine::{SimError, SimResult, SimulationEngine};
use crate::scatterers::{FixedScatterer, FixedScatterers, SplineScatterers};

/// Half thickness of the generated slab in elevation (meters)
const SLAB_HALF_THICKNESS: f64 = 3e-3;

/// Vessel radius relative to the imaged depth
const VESSEL_RADIUS_FRACTION: f64 = 0.08;

/// Scatterers ready to be installed into an engine
#[derive(Debug, Clone, Default)]
pub struct Phantom {
    pub fixed: Option<FixedScatterers>,
    pub spline: Option<SplineScatterers>,
}

impl Phantom {
    pub fn num_scatterers(&self) -> usize {
        self.fixed.as_ref().map_or(0, |f| f.len()) + self.spline.as_ref().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.num_scatterers() == 0
    }

    /// Load whichever scatterer sets the container holds.
    pub fn load(path: &Path) -> ContainerResult<Self> {
        let c = Container::open(path)?;
        let phantom = Self {
            fixed: load_fixed_scatterers(&c)?,
            spline: load_spline_scatterers(&c)?,
        };
        info!(
            path = %path.display(),
            scatterers = phantom.num_scatterers(),
            "Phantom loaded"
        );
        Ok(phantom)
    }

    /// Generate a phantom covering `geometry` for times in `[t_min, t_max]`.
    pub fn generate(
        geometry: &ScanGeometry,
        config: &PhantomConfig,
        t_min: f64,
        t_max: f64,
    ) -> SimResult<Self> {
        geometry
            .validate()
            .map_err(|e| SimError::InvalidParameter { key: "geometry".to_string(), value: e.to_string() })?;
        let extent = geometry.xy_extent();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let amplitude = Normal::new(0.0f32, 1.0)
            .map_err(|e| SimError::InvalidParameter { key: "amplitude".to_string(), value: e.to_string() })?;

        let fixed = (0..config.num_fixed)
            .map(|_| FixedScatterer {
                position: Vector3::new(
                    rng.gen_range(extent.x_min..=extent.x_max),
                    rng.gen_range(-SLAB_HALF_THICKNESS..=SLAB_HALF_THICKNESS),
                    rng.gen_range(extent.y_min.max(0.0)..=extent.y_max),
                ),
                amplitude: amplitude.sample(&mut rng),
            })
            .collect();

        let spline = if config.num_spline > 0 {
            Some(vessel(&extent, config, t_min, t_max, &mut rng, &amplitude)?)
        } else {
            None
        };

        let phantom = Self { fixed: Some(FixedScatterers::new(fixed)), spline };
        info!(
            fixed = config.num_fixed,
            spline = config.num_spline,
            seed = config.seed,
            "Phantom generated"
        );
        Ok(phantom)
    }

    /// Replace the engine's scatterers with this phantom.
    pub fn install(&self, engine: &mut dyn SimulationEngine) -> SimResult<()> {
        engine.clear_fixed_scatterers();
        engine.clear_spline_scatterers();
        if let Some(fixed) = &self.fixed {
            engine.add_fixed_scatterers(Arc::new(fixed.clone()))?;
        }
        if let Some(spline) = &self.spline {
            engine.add_spline_scatterers(Arc::new(spline.clone()))?;
        }
        Ok(())
    }
}

/// Scatterers inside a lateral cylinder, each on a straight degree-1 path.
fn vessel(
    extent: &echoscan_core::XyExtent,
    config: &PhantomConfig,
    t_min: f64,
    t_max: f64,
    rng: &mut StdRng,
    amplitude: &Normal<f32>,
) -> SimResult<SplineScatterers> {
    let t_max = if t_max > t_min { t_max } else { t_min + 1.0 };
    let depth = extent.y_max - extent.y_min.max(0.0);
    let radius = VESSEL_RADIUS_FRACTION * depth;
    let center_z = extent.y_min.max(0.0) + 0.6 * depth;
    let travel = config.flow_velocity * (t_max - t_min);

    let mut control_points = Vec::with_capacity(config.num_spline);
    let mut amplitudes = Vec::with_capacity(config.num_spline);
    for _ in 0..config.num_spline {
        // uniform over the disc
        let r = radius * rng.gen::<f64>().sqrt();
        let phi = rng.gen_range(0.0..std::f64::consts::TAU);
        let x0 = rng.gen_range(extent.x_min..=extent.x_max);
        let y = r * phi.cos();
        let z = center_z + r * phi.sin();
        control_points.push(vec![Vector3::new(x0, y, z), Vector3::new(x0 + travel, y, z)]);
        amplitudes.push(amplitude.sample(rng));
    }
    SplineScatterers::new(1, vec![t_min, t_min, t_max, t_max], control_points, amplitudes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::write_scatterers;
    use crate::simulator::ReferenceSimulator;
    use approx::assert_abs_diff_eq;

    fn small_config() -> PhantomConfig {
        PhantomConfig {
            num_fixed: 200,
            num_spline: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_within_extent() {
        let geometry = ScanGeometry::Linear { width: 0.04, range_max: 0.06 };
        let p = Phantom::generate(&geometry, &small_config(), 0.0, 1.0).unwrap();
        assert_eq!(p.num_scatterers(), 220);
        for s in &p.fixed.as_ref().unwrap().scatterers {
            assert!(s.position.x.abs() <= 0.02);
            assert!((0.0..=0.06).contains(&s.position.z));
        }
    }

    #[test]
    fn test_generation_is_seeded() {
        let geometry = ScanGeometry::default();
        let a = Phantom::generate(&geometry, &small_config(), 0.0, 1.0).unwrap();
        let b = Phantom::generate(&geometry, &small_config(), 0.0, 1.0).unwrap();
        assert_eq!(a.fixed, b.fixed);
        let other = PhantomConfig { seed: 7, ..small_config() };
        let c = Phantom::generate(&geometry, &other, 0.0, 1.0).unwrap();
        assert_ne!(a.fixed, c.fixed);
    }

    #[test]
    fn test_vessel_flows_laterally() {
        let geometry = ScanGeometry::Linear { width: 0.04, range_max: 0.06 };
        let config = PhantomConfig { flow_velocity: 0.1, ..small_config() };
        let p = Phantom::generate(&geometry, &config, 0.0, 0.5).unwrap();
        let spline = p.spline.unwrap();
        assert_eq!(spline.time_limits(), Some((0.0, 0.5)));
        let start = spline.position_at(0, 0.0).unwrap();
        let end = spline.position_at(0, 0.5).unwrap();
        assert_abs_diff_eq!(end.x - start.x, 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(end.z, start.z, epsilon = 1e-12);
    }

    #[test]
    fn test_no_spline_when_disabled() {
        let config = PhantomConfig { num_spline: 0, ..small_config() };
        let p = Phantom::generate(&ScanGeometry::default(), &config, 0.0, 1.0).unwrap();
        assert!(p.spline.is_none());
    }

    #[test]
    fn test_load_and_install() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phantom.escn");
        let p = Phantom::generate(&ScanGeometry::default(), &small_config(), 0.0, 1.0).unwrap();
        write_scatterers(&path, p.fixed.as_ref(), p.spline.as_ref()).unwrap();

        let loaded = Phantom::load(&path).unwrap();
        assert_eq!(loaded.num_scatterers(), 220);

        let mut engine = ReferenceSimulator::new().unwrap();
        loaded.install(&mut engine).unwrap();
        assert_eq!(engine.total_num_scatterers(), 220);
        // installing again replaces rather than appends
        loaded.install(&mut engine).unwrap();
        assert_eq!(engine.total_num_scatterers(), 220);
    }
}
