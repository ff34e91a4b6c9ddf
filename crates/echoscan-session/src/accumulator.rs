//! IQ recording buffer

use echoscan_core::RawIqFrame;
use echoscan_sim::write_iq_frames;
use std::path::Path;
use tracing::info;

use crate::error::{SessionError, SessionResult};

/// Append-only buffer of raw frames with one timestamp per frame
#[derive(Debug, Clone, Default)]
pub struct IqAccumulator {
    frames: Vec<RawIqFrame>,
    timestamps: Vec<f64>,
}

impl IqAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame; shapes are only checked on export.
    pub fn push(&mut self, frame: RawIqFrame, timestamp: f64) {
        self.frames.push(frame);
        self.timestamps.push(timestamp);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[RawIqFrame] {
        &self.frames
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.timestamps.clear();
    }

    /// Check counts and the common `(num_lines, num_samples)` shape.
    pub fn validate(&self) -> SessionResult<(usize, usize)> {
        if self.frames.len() != self.timestamps.len() {
            return Err(SessionError::ShapeMismatch(format!(
                "{} frames but {} timestamps",
                self.frames.len(),
                self.timestamps.len()
            )));
        }
        let first = self.frames.first().ok_or(SessionError::EmptyAccumulator)?;
        let shape = first.shape();
        if let Some((idx, frame)) = self.frames.iter().enumerate().find(|(_, f)| f.shape() != shape) {
            return Err(SessionError::ShapeMismatch(format!(
                "frame {} has shape {:?}, expected {:?}",
                idx,
                frame.shape(),
                shape
            )));
        }
        Ok(shape)
    }

    /// Write the buffer as `iq_real`/`iq_imag`/`frame_times`.
    ///
    /// Nothing is written when validation fails. The buffer is left as is;
    /// the caller decides whether to clear it.
    pub fn export(&self, path: &Path) -> SessionResult<()> {
        let (lines, samples) = self.validate()?;
        write_iq_frames(path, &self.frames, &self.timestamps)?;
        info!(
            path = %path.display(),
            frames = self.frames.len(),
            lines,
            samples,
            "IQ buffer exported"
        );
        Ok(())
    }
}
