//! Core types for ultrasound IQ data
//!
//! The simulation engine produces complex baseband (I/Q) samples along each
//! scan-line. One acquisition of a full scan sequence yields a [`RawIqFrame`]:
//! one sample vector per line, all of equal length.
//!
//! ```text
//!              sample index (depth) ──►
//!   line 0   [ iq iq iq iq iq ... iq ]
//!   line 1   [ iq iq iq iq iq ... iq ]
//!    ...
//!   line L-1 [ iq iq iq iq iq ... iq ]
//! ```
//!
//! Samples are stored in single precision, which is also the precision of the
//! exported IQ container, so export followed by import is bit-exact.

use num_complex::Complex32;

/// A single I/Q sample
pub type IqSample = Complex32;

/// The samples of one scan-line
pub type IqLine = Vec<IqSample>;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core data model
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// One acquisition worth of IQ data, indexed `[line][sample]`.
///
/// Every line of a frame has the same number of samples. Different frames
/// may have different sample counts (e.g. after a change of decimation).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawIqFrame {
    lines: Vec<IqLine>,
}

impl RawIqFrame {
    /// Build a frame from per-line samples, rejecting ragged input.
    pub fn from_lines(lines: Vec<IqLine>) -> CoreResult<Self> {
        if let Some(first) = lines.first() {
            let expected = first.len();
            if let Some((idx, line)) = lines.iter().enumerate().find(|(_, l)| l.len() != expected) {
                return Err(CoreError::ShapeMismatch(format!(
                    "line {} has {} samples, expected {}",
                    idx,
                    line.len(),
                    expected
                )));
            }
        }
        Ok(Self { lines })
    }

    /// A frame of `num_lines` lines, each holding `num_samples` zeros.
    pub fn zeros(num_lines: usize, num_samples: usize) -> Self {
        Self {
            lines: vec![vec![IqSample::new(0.0, 0.0); num_samples]; num_lines],
        }
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// Samples per line (0 for an empty frame)
    pub fn num_samples(&self) -> usize {
        self.lines.first().map_or(0, |l| l.len())
    }

    /// `(num_lines, num_samples)`
    pub fn shape(&self) -> (usize, usize) {
        (self.num_lines(), self.num_samples())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() || self.num_samples() == 0
    }

    pub fn lines(&self) -> &[IqLine] {
        &self.lines
    }

    pub fn line(&self, idx: usize) -> Option<&[IqSample]> {
        self.lines.get(idx).map(|l| l.as_slice())
    }

    /// Sample at `(line, sample)`, `None` when out of range
    #[inline]
    pub fn sample(&self, line: usize, sample: usize) -> Option<IqSample> {
        self.lines.get(line).and_then(|l| l.get(sample)).copied()
    }

    /// Largest envelope value in the frame
    pub fn max_magnitude(&self) -> f32 {
        self.lines
            .iter()
            .flat_map(|l| l.iter())
            .map(|s| s.norm())
            .fold(0.0_f32, f32::max)
    }

    pub fn into_lines(self) -> Vec<IqLine> {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_frame_rejected() {
        let lines = vec![vec![IqSample::new(1.0, 0.0); 4], vec![IqSample::new(1.0, 0.0); 3]];
        let err = RawIqFrame::from_lines(lines).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch(_)));
    }

    #[test]
    fn test_frame_shape() {
        let frame = RawIqFrame::zeros(3, 7);
        assert_eq!(frame.shape(), (3, 7));
        assert!(!frame.is_empty());
        assert_eq!(frame.sample(2, 6), Some(IqSample::new(0.0, 0.0)));
        assert_eq!(frame.sample(3, 0), None);

        let empty = RawIqFrame::from_lines(Vec::new()).unwrap();
        assert_eq!(empty.shape(), (0, 0));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_max_magnitude() {
        let lines = vec![
            vec![IqSample::new(3.0, 4.0), IqSample::new(0.5, 0.0)],
            vec![IqSample::new(0.0, -1.0), IqSample::new(0.0, 2.0)],
        ];
        let frame = RawIqFrame::from_lines(lines).unwrap();
        assert!((frame.max_magnitude() - 5.0).abs() < 1e-6);
    }
}
