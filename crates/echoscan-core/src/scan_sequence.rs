//! Scan sequences and their construction
//!
//! A [`ScanSequence`] is the ordered set of world-space scan-lines fired in
//! one sweep. Sequences are immutable: a geometry or time change produces a
//! new one via [`ScanSequenceBuilder::build`], and color-Doppler packets are
//! derived with [`ScanSequence::with_time_offset`].

use serde::{Deserialize, Serialize};

use crate::geometry::ScanGeometry;
use crate::probe::PoseSource;
use crate::types::{CoreError, CoreResult};
use crate::vector::Vector3;

/// Default speed of sound in soft tissue (m/s)
pub const DEFAULT_SOUND_SPEED: f64 = 1540.0;

/// One world-space scan-line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanLine {
    pub origin: Vector3,
    pub direction: Vector3,
    pub lateral_dir: Vector3,
    /// Firing time in seconds
    pub timestamp: f64,
}

/// Ordered scan-lines sharing a common length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSequence {
    line_length: f64,
    lines: Vec<ScanLine>,
    equal_timestamps: bool,
}

impl ScanSequence {
    pub fn line_length(&self) -> f64 {
        self.line_length
    }

    pub fn lines(&self) -> &[ScanLine] {
        &self.lines
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn equal_timestamps(&self) -> bool {
        self.equal_timestamps
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.lines.iter().map(|l| l.timestamp).collect()
    }

    /// Copy of this sequence with every timestamp shifted by `dt` seconds.
    pub fn with_time_offset(&self, dt: f64) -> ScanSequence {
        ScanSequence {
            line_length: self.line_length,
            lines: self
                .lines
                .iter()
                .map(|l| ScanLine { timestamp: l.timestamp + dt, ..*l })
                .collect(),
            equal_timestamps: self.equal_timestamps,
        }
    }
}

/// Builds scan sequences from a geometry and a probe pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSequenceBuilder {
    sound_speed: f64,
}

impl Default for ScanSequenceBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_SOUND_SPEED)
    }
}

impl ScanSequenceBuilder {
    pub fn new(sound_speed: f64) -> Self {
        Self { sound_speed }
    }

    pub fn sound_speed(&self) -> f64 {
        self.sound_speed
    }

    /// Pulse round-trip time for one line of the given geometry.
    pub fn line_interval(&self, geometry: &ScanGeometry) -> f64 {
        2.0 * geometry.line_length() / self.sound_speed
    }

    /// Build the sequence for `geometry` as seen at `time`.
    ///
    /// The pose is sampled once at `time`. With `equal_timestamps` every line
    /// carries `time`; otherwise line `i` fires at `time + i * line_interval`.
    pub fn build(
        &self,
        geometry: &ScanGeometry,
        num_lines: usize,
        time: f64,
        pose_source: &dyn PoseSource,
        equal_timestamps: bool,
    ) -> CoreResult<ScanSequence> {
        if num_lines == 0 {
            return Err(CoreError::InvalidGeometry("number of lines must be positive".to_string()));
        }
        geometry.validate()?;
        if !(self.sound_speed.is_finite() && self.sound_speed > 0.0) {
            return Err(CoreError::InvalidGeometry(format!(
                "sound speed must be positive, got {}",
                self.sound_speed
            )));
        }

        let pose = pose_source.pose_at(time);
        let rot = pose.rotation();
        let interval = self.line_interval(geometry);

        let lines = (0..num_lines)
            .map(|i| {
                let local = geometry.local_line(i, num_lines);
                let timestamp = if equal_timestamps {
                    time
                } else {
                    time + i as f64 * interval
                };
                ScanLine {
                    origin: pose.origin + rot.apply(&local.origin),
                    direction: rot.apply(&local.direction),
                    lateral_dir: rot.apply(&local.lateral_dir),
                    timestamp,
                }
            })
            .collect();

        Ok(ScanSequence {
            line_length: geometry.line_length(),
            lines,
            equal_timestamps,
        })
    }
}
