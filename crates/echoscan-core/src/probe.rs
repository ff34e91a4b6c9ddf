//! Probe pose and motion models
//!
//! The probe pose places the probe-local scan frame in world space. A
//! [`PoseSource`] answers "where is the probe at time t"; [`ProbeMotion`]
//! covers the common cases and any `Fn(f64) -> Pose` closure works too.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::vector::{Rotation, Vector3};

/// Rigid transform of the probe frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Probe origin in world space (meters)
    pub origin: Vector3,
    /// Euler angles `(a, b, c)` in radians, applied as `Rz(c) * Ry(b) * Rx(a)`
    pub rot_angles: Vector3,
}

impl Pose {
    pub fn new(origin: Vector3, rot_angles: Vector3) -> Self {
        Self { origin, rot_angles }
    }

    pub fn rotation(&self) -> Rotation {
        Rotation::from_euler(&self.rot_angles)
    }

    /// Map a probe-local point into world space.
    pub fn transform_point(&self, p: &Vector3) -> Vector3 {
        self.origin + self.rotation().apply(p)
    }
}

/// Anything that can report the probe pose at a point in time
pub trait PoseSource {
    fn pose_at(&self, time: f64) -> Pose;
}

impl<F> PoseSource for F
where
    F: Fn(f64) -> Pose,
{
    fn pose_at(&self, time: f64) -> Pose {
        self(time)
    }
}

/// Probe motion profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeMotion {
    /// Probe held still
    Static { pose: Pose },
    /// Constant translational velocity (m/s) from a start pose
    Linear { start: Pose, velocity: Vector3 },
    /// Sinusoidal sweep around a centre pose
    Oscillating {
        center: Pose,
        /// Peak translational displacement (meters)
        #[serde(default)]
        displacement: Vector3,
        /// Peak angular displacement (radians)
        #[serde(default)]
        rocking: Vector3,
        /// Oscillation frequency in Hz
        frequency: f64,
    },
}

impl Default for ProbeMotion {
    fn default() -> Self {
        ProbeMotion::Static { pose: Pose::default() }
    }
}

impl PoseSource for ProbeMotion {
    fn pose_at(&self, time: f64) -> Pose {
        match self {
            ProbeMotion::Static { pose } => *pose,
            ProbeMotion::Linear { start, velocity } => {
                Pose::new(start.origin + *velocity * time, start.rot_angles)
            }
            ProbeMotion::Oscillating { center, displacement, rocking, frequency } => {
                let s = (TAU * frequency * time).sin();
                Pose::new(
                    center.origin + *displacement * s,
                    center.rot_angles + *rocking * s,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_static_pose() {
        let pose = Pose::new(Vector3::new(0.0, 0.0, 0.01), Vector3::zero());
        let motion = ProbeMotion::Static { pose };
        assert_eq!(motion.pose_at(0.0), pose);
        assert_eq!(motion.pose_at(12.5), pose);
    }

    #[test]
    fn test_linear_motion() {
        let motion = ProbeMotion::Linear {
            start: Pose::default(),
            velocity: Vector3::new(0.01, 0.0, 0.0),
        };
        assert_abs_diff_eq!(motion.pose_at(2.0).origin.x, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_oscillating_motion() {
        let motion = ProbeMotion::Oscillating {
            center: Pose::default(),
            displacement: Vector3::zero(),
            rocking: Vector3::new(0.0, 0.2, 0.0),
            frequency: 1.0,
        };
        assert_abs_diff_eq!(motion.pose_at(0.25).rot_angles.y, 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(motion.pose_at(0.5).rot_angles.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_closure_source() {
        let source = |t: f64| Pose::new(Vector3::new(t, 0.0, 0.0), Vector3::zero());
        assert_eq!(source.pose_at(3.0).origin.x, 3.0);
    }

    #[test]
    fn test_transform_point() {
        let pose = Pose::new(
            Vector3::new(0.0, 0.0, 0.01),
            Vector3::new(0.0, std::f64::consts::FRAC_PI_2, 0.0),
        );
        let p = pose.transform_point(&Vector3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.z, 0.01, epsilon = 1e-12);
    }
}
