//! B-mode and color-Doppler acquisition
//!
//! Both paths call into the engine synchronously and time only the simulate
//! calls. A color acquisition fires the same line set `packet_size` times,
//! packet `k` offset by `k / prf`, strictly in increasing timestamp order.

use echoscan_core::{RawIqFrame, ScanSequence};
use echoscan_sim::SimulationEngine;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{SessionError, SessionResult};

/// Output of one B-mode acquisition
#[derive(Debug, Clone)]
pub struct BModeAcquisition {
    pub frame: RawIqFrame,
    pub elapsed: Duration,
}

/// Output of one color-Doppler packet acquisition
#[derive(Debug, Clone)]
pub struct ColorAcquisition {
    /// One frame per packet, in firing order
    pub frames: Vec<RawIqFrame>,
    /// Timestamp offset of each packet relative to the base sequence
    pub packet_offsets: Vec<f64>,
    /// Sum of the simulate calls
    pub elapsed: Duration,
}

impl ColorAcquisition {
    pub fn packet_size(&self) -> usize {
        self.frames.len()
    }

    /// Average simulate time per packet
    pub fn per_packet(&self) -> Duration {
        match self.frames.len() {
            0 => Duration::ZERO,
            n => self.elapsed / n as u32,
        }
    }
}

/// Install `sequence` and run one blocking simulate call.
pub fn run_bmode(engine: &mut dyn SimulationEngine, sequence: &ScanSequence) -> SessionResult<BModeAcquisition> {
    engine.set_scan_sequence(sequence)?;
    let start = Instant::now();
    let frame = engine.simulate_lines()?;
    let elapsed = start.elapsed();
    debug!(
        lines = frame.num_lines(),
        samples = frame.num_samples(),
        elapsed_ms = elapsed.as_secs_f64() * 1e3,
        "B-mode frame simulated"
    );
    Ok(BModeAcquisition { frame, elapsed })
}

/// Fire `packet_size` packets derived from `base`.
///
/// Any failure abandons the whole acquisition. The base sequence is
/// reinstalled on the engine afterwards in every case.
pub fn run_color_doppler(
    engine: &mut dyn SimulationEngine,
    base: &ScanSequence,
    packet_size: usize,
    prf: f64,
) -> SessionResult<ColorAcquisition> {
    if packet_size == 0 {
        return Err(SessionError::InvalidRequest("color packet size must be positive".to_string()));
    }
    if !(prf.is_finite() && prf > 0.0) {
        return Err(SessionError::InvalidRequest(format!("invalid PRF {}", prf)));
    }

    let result = fire_packets(engine, base, packet_size, prf);
    let restored = engine.set_scan_sequence(base);
    let acquisition = result?;
    restored?;
    debug!(
        packets = packet_size,
        per_packet_ms = acquisition.per_packet().as_secs_f64() * 1e3,
        "Color packet simulated"
    );
    Ok(acquisition)
}

fn fire_packets(
    engine: &mut dyn SimulationEngine,
    base: &ScanSequence,
    packet_size: usize,
    prf: f64,
) -> SessionResult<ColorAcquisition> {
    let mut frames = Vec::with_capacity(packet_size);
    let mut packet_offsets = Vec::with_capacity(packet_size);
    let mut elapsed = Duration::ZERO;

    for packet_no in 0..packet_size {
        let offset = packet_no as f64 / prf;
        let sequence = base.with_time_offset(offset);
        engine.set_scan_sequence(&sequence)?;

        let start = Instant::now();
        let frame = engine.simulate_lines()?;
        elapsed += start.elapsed();

        frames.push(frame);
        packet_offsets.push(offset);
    }
    Ok(ColorAcquisition { frames, packet_offsets, elapsed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;
    use approx::assert_abs_diff_eq;
    use echoscan_core::{ProbeMotion, ScanGeometry, ScanSequenceBuilder};

    fn two_line_sequence() -> ScanSequence {
        ScanSequenceBuilder::default()
            .build(&ScanGeometry::default(), 2, 0.25, &ProbeMotion::default(), false)
            .unwrap()
    }

    #[test]
    fn test_bmode_installs_sequence() {
        let mut engine = MockEngine::new();
        let log = engine.log.clone();
        let seq = two_line_sequence();
        let acq = run_bmode(&mut engine, &seq).unwrap();
        assert_eq!(acq.frame.num_lines(), 2);
        assert_eq!(log.lock().unwrap().sequences, vec![seq.timestamps()]);
    }

    #[test]
    fn test_bmode_failure_propagates() {
        let mut engine = MockEngine::failing_on(1);
        let err = run_bmode(&mut engine, &two_line_sequence()).unwrap_err();
        assert!(err.is_simulation());
    }

    #[test]
    fn test_color_packet_timestamps() {
        let mut engine = MockEngine::new();
        let log = engine.log.clone();
        let base = two_line_sequence();
        let acq = run_color_doppler(&mut engine, &base, 4, 2500.0).unwrap();
        assert_eq!(acq.packet_size(), 4);

        let expected = [0.0, 0.0004, 0.0008, 0.0012];
        for (offset, want) in acq.packet_offsets.iter().zip(expected) {
            assert_abs_diff_eq!(*offset, want, epsilon = 1e-15);
        }

        let log = log.lock().unwrap();
        // four packets, then the base sequence restored
        assert_eq!(log.sequences.len(), 5);
        for (packet, want) in log.sequences[..4].iter().zip(expected) {
            for (t, t0) in packet.iter().zip(base.timestamps()) {
                assert_abs_diff_eq!(*t, t0 + want, epsilon = 1e-12);
            }
        }
        assert_eq!(log.sequences[4], base.timestamps());
        assert!(log.simulated_at.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_color_failure_discards_packets() {
        let mut engine = MockEngine::failing_on(2);
        let log = engine.log.clone();
        let base = two_line_sequence();
        let err = run_color_doppler(&mut engine, &base, 4, 2500.0).unwrap_err();
        assert!(err.is_simulation());

        let log = log.lock().unwrap();
        assert_eq!(log.simulated_at.len(), 1);
        assert_eq!(log.sequences.last().unwrap(), &base.timestamps());
    }

    #[test]
    fn test_color_rejects_bad_request() {
        let mut engine = MockEngine::new();
        let base = two_line_sequence();
        assert!(matches!(
            run_color_doppler(&mut engine, &base, 0, 2500.0),
            Err(SessionError::InvalidRequest(_))
        ));
        assert!(matches!(
            run_color_doppler(&mut engine, &base, 4, 0.0),
            Err(SessionError::InvalidRequest(_))
        ));
        assert!(engine.log.lock().unwrap().sequences.is_empty());
    }
}
