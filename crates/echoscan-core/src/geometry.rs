//! Scan geometry descriptors
//!
//! A geometry defines where the scan-lines of one sweep sit in probe-local
//! space. Two layouts are supported:
//!
//! ```text
//!        Sector                      Linear
//!
//!          /|\                    | | | | | |
//!         / | \                   | | | | | |
//!        /  |  \                  | | | | | |
//!       /   |   \                 | | | | | |
//!      '----+----'                '-+-+-+-+-'
//!     angle -w/2 .. +w/2          x -w/2 .. +w/2
//! ```
//!
//! The image plane is the lateral/depth plane (x lateral, y depth). The
//! inverse mapping from that plane back to beam space is what scan
//! conversion uses to rasterize IQ data.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::types::{CoreError, CoreResult};
use crate::vector::Vector3;

/// Scan geometry, defined in probe-local space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanGeometry {
    /// Lines fan out from a common apex
    Sector {
        /// Total opening angle in radians
        width: f64,
        /// Line length in meters
        radial_length: f64,
        /// Steering offset of the sector centre in radians
        #[serde(default)]
        tilt: f64,
    },
    /// Parallel lines along the lateral axis
    Linear {
        /// Lateral aperture in meters
        width: f64,
        /// Line length in meters
        range_max: f64,
    },
}

impl Default for ScanGeometry {
    fn default() -> Self {
        ScanGeometry::Sector {
            width: 75.0_f64.to_radians(),
            radial_length: 0.12,
            tilt: 0.0,
        }
    }
}

/// One line in probe-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalLine {
    pub origin: Vector3,
    pub direction: Vector3,
    pub lateral_dir: Vector3,
}

/// Cartesian bounds of the image plane in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct XyExtent {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl XyExtent {
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

impl std::fmt::Display for XyExtent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x={}...{}, y={}...{} (width {}, height {})",
            self.x_min,
            self.x_max,
            self.y_min,
            self.y_max,
            self.width(),
            self.height()
        )
    }
}

impl ScanGeometry {
    /// Check that all dimensions are finite and positive.
    pub fn validate(&self) -> CoreResult<()> {
        match *self {
            ScanGeometry::Sector { width, radial_length, tilt } => {
                if !(width.is_finite() && width > 0.0 && width < PI) {
                    return Err(CoreError::InvalidGeometry(format!(
                        "sector width must be in (0, pi) rad, got {}",
                        width
                    )));
                }
                if !(radial_length.is_finite() && radial_length > 0.0) {
                    return Err(CoreError::InvalidGeometry(format!(
                        "radial length must be positive, got {}",
                        radial_length
                    )));
                }
                if !tilt.is_finite() {
                    return Err(CoreError::InvalidGeometry("tilt is not finite".to_string()));
                }
            }
            ScanGeometry::Linear { width, range_max } => {
                if !(width.is_finite() && width > 0.0) {
                    return Err(CoreError::InvalidGeometry(format!(
                        "linear width must be positive, got {}",
                        width
                    )));
                }
                if !(range_max.is_finite() && range_max > 0.0) {
                    return Err(CoreError::InvalidGeometry(format!(
                        "range must be positive, got {}",
                        range_max
                    )));
                }
            }
        }
        Ok(())
    }

    /// Length of every line in meters
    pub fn line_length(&self) -> f64 {
        match *self {
            ScanGeometry::Sector { radial_length, .. } => radial_length,
            ScanGeometry::Linear { range_max, .. } => range_max,
        }
    }

    /// Steering angle of line `idx` (sector only)
    fn line_angle(&self, idx: usize, num_lines: usize) -> f64 {
        match *self {
            ScanGeometry::Sector { width, tilt, .. } => {
                if num_lines <= 1 {
                    tilt
                } else {
                    tilt - width / 2.0 + width * idx as f64 / (num_lines - 1) as f64
                }
            }
            ScanGeometry::Linear { .. } => 0.0,
        }
    }

    /// Origin and directions of line `idx` out of `num_lines`.
    pub fn local_line(&self, idx: usize, num_lines: usize) -> LocalLine {
        match *self {
            ScanGeometry::Sector { .. } => {
                let (s, c) = self.line_angle(idx, num_lines).sin_cos();
                LocalLine {
                    origin: Vector3::zero(),
                    direction: Vector3::new(s, 0.0, c),
                    lateral_dir: Vector3::new(c, 0.0, -s),
                }
            }
            ScanGeometry::Linear { width, .. } => {
                let x = if num_lines <= 1 {
                    0.0
                } else {
                    -width / 2.0 + width * idx as f64 / (num_lines - 1) as f64
                };
                LocalLine {
                    origin: Vector3::new(x, 0.0, 0.0),
                    direction: Vector3::new(0.0, 0.0, 1.0),
                    lateral_dir: Vector3::new(1.0, 0.0, 0.0),
                }
            }
        }
    }

    /// Cartesian extent of the scanned region in the image plane.
    pub fn xy_extent(&self) -> XyExtent {
        match *self {
            ScanGeometry::Sector { width, radial_length: r, tilt } => {
                let theta_min = tilt - width / 2.0;
                let theta_max = tilt + width / 2.0;
                let y_max = if theta_min <= 0.0 && theta_max >= 0.0 {
                    r
                } else {
                    r * theta_min.cos().max(theta_max.cos())
                };
                XyExtent {
                    x_min: (r * theta_min.sin()).min(0.0),
                    x_max: (r * theta_max.sin()).max(0.0),
                    y_min: (r * theta_min.cos()).min(r * theta_max.cos()).min(0.0),
                    y_max,
                }
            }
            ScanGeometry::Linear { width, range_max } => XyExtent {
                x_min: -width / 2.0,
                x_max: width / 2.0,
                y_min: 0.0,
                y_max: range_max,
            },
        }
    }

    /// Map an image-plane point to beam space.
    ///
    /// Returns `(line_position, radial_fraction)` where `line_position` is a
    /// fractional line index in `[0, num_lines - 1]` and `radial_fraction` is
    /// depth along the line in `[0, 1]`. Points outside the scanned region
    /// give `None`.
    pub fn beam_coordinates(&self, x: f64, y: f64, num_lines: usize) -> Option<(f64, f64)> {
        if num_lines == 0 {
            return None;
        }
        let span = (num_lines - 1) as f64;
        match *self {
            ScanGeometry::Sector { width, radial_length, tilt } => {
                let r = x.hypot(y);
                if r > radial_length {
                    return None;
                }
                let theta = x.atan2(y);
                let theta_min = tilt - width / 2.0;
                let rel = (theta - theta_min) / width;
                if !(0.0..=1.0).contains(&rel) {
                    return None;
                }
                Some((rel * span, r / radial_length))
            }
            ScanGeometry::Linear { width, range_max } => {
                if y < 0.0 || y > range_max {
                    return None;
                }
                let rel = (x + width / 2.0) / width;
                if !(0.0..=1.0).contains(&rel) {
                    return None;
                }
                Some((rel * span, y / range_max))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_validate() {
        assert!(ScanGeometry::default().validate().is_ok());
        let bad = ScanGeometry::Sector { width: 0.0, radial_length: 0.1, tilt: 0.0 };
        assert!(matches!(bad.validate(), Err(CoreError::InvalidGeometry(_))));
        let bad = ScanGeometry::Linear { width: 0.04, range_max: f64::NAN };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_sector_lines_span_width() {
        let geo = ScanGeometry::Sector { width: 1.0, radial_length: 0.1, tilt: 0.0 };
        let first = geo.local_line(0, 3);
        let mid = geo.local_line(1, 3);
        let last = geo.local_line(2, 3);
        assert_abs_diff_eq!(first.direction.x, (-0.5_f64).sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(mid.direction.z, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(last.direction.x, 0.5_f64.sin(), epsilon = 1e-12);
        // lateral direction is orthogonal to the beam
        assert_abs_diff_eq!(first.direction.dot(&first.lateral_dir), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sector_extent() {
        let geo = ScanGeometry::Sector { width: 1.0, radial_length: 0.1, tilt: 0.0 };
        let ext = geo.xy_extent();
        assert_abs_diff_eq!(ext.x_min, -0.1 * 0.5_f64.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(ext.x_max, 0.1 * 0.5_f64.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(ext.y_min, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ext.y_max, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_extent_and_lines() {
        let geo = ScanGeometry::Linear { width: 0.04, range_max: 0.06 };
        let ext = geo.xy_extent();
        assert_abs_diff_eq!(ext.width(), 0.04, epsilon = 1e-12);
        assert_abs_diff_eq!(ext.height(), 0.06, epsilon = 1e-12);
        assert_abs_diff_eq!(geo.local_line(0, 5).origin.x, -0.02, epsilon = 1e-12);
        assert_abs_diff_eq!(geo.local_line(4, 5).origin.x, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_beam_coordinates() {
        let geo = ScanGeometry::Sector { width: 1.0, radial_length: 0.1, tilt: 0.0 };
        let (line, radial) = geo.beam_coordinates(0.0, 0.05, 11).unwrap();
        assert_abs_diff_eq!(line, 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(radial, 0.5, epsilon = 1e-9);
        assert!(geo.beam_coordinates(0.0, 0.2, 11).is_none());
        assert!(geo.beam_coordinates(0.09, 0.01, 11).is_none());

        let lin = ScanGeometry::Linear { width: 0.04, range_max: 0.06 };
        let (line, radial) = lin.beam_coordinates(0.02, 0.06, 5).unwrap();
        assert_abs_diff_eq!(line, 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(radial, 1.0, epsilon = 1e-9);
    }
}
