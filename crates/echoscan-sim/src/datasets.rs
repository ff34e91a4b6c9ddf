//! Named datasets stored in the container format
//!
//! | Content            | Datasets                                                        |
//! |--------------------|-----------------------------------------------------------------|
//! | fixed scatterers   | `data [N,4]` as `x, y, z, amplitude`                            |
//! | spline scatterers  | `nodes [N,C,4]`, `knot_vector [K]`, `spline_degree` (i32)       |
//! | excitation         | `samples`, `sampling_frequency`, `center_index`, `demod_freq`   |
//! | beam lookup table  | `beam_profile [R,L,E]`, `extents [6]`                           |
//! | recorded IQ        | `iq_real`, `iq_imag` `[F,L,S]`, `frame_times [F]`               |
//! | simulated IQ dump  | `sim_data_real`, `sim_data_imag` `[F,S,L]` or `[S,L]`           |
//!
//! The amplitude of a spline scatterer is the fourth component of its first
//! control point.

use echoscan_core::{IqLine, IqSample, RawIqFrame, Vector3};
use std::path::Path;
use tracing::{debug, info};

use crate::container::{Container, ContainerError, ContainerResult, ContainerWriter};
use crate::scatterers::{
    ExcitationSignal, FixedScatterer, FixedScatterers, LutProfile, SplineScatterers,
};

fn invalid(e: impl std::fmt::Display) -> ContainerError {
    ContainerError::Format(e.to_string())
}

fn expect_rank<'a>(c: &'a Container, name: &str, rank: usize, last: Option<usize>) -> ContainerResult<&'a [usize]> {
    let shape = c.shape(name)?;
    if shape.len() != rank || last.is_some_and(|n| shape[rank - 1] != n) {
        return Err(ContainerError::Format(format!(
            "dataset '{}' has shape {:?}, expected rank {}{}",
            name,
            shape,
            rank,
            last.map(|n| format!(" ending in {}", n)).unwrap_or_default()
        )));
    }
    Ok(shape)
}

// ─── Scatterers ──────────────────────────────────────────────────────────────

/// Fixed scatterers from `data`, `None` when the container holds none.
pub fn load_fixed_scatterers(c: &Container) -> ContainerResult<Option<FixedScatterers>> {
    if !c.contains("data") {
        return Ok(None);
    }
    expect_rank(c, "data", 2, Some(4))?;
    let raw = c.read_f32("data")?;
    let scatterers = raw
        .chunks_exact(4)
        .map(|p| FixedScatterer {
            position: Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64),
            amplitude: p[3],
        })
        .collect();
    Ok(Some(FixedScatterers::new(scatterers)))
}

/// Spline scatterers from `nodes`, `knot_vector` and `spline_degree`.
pub fn load_spline_scatterers(c: &Container) -> ContainerResult<Option<SplineScatterers>> {
    if !c.contains("nodes") {
        return Ok(None);
    }
    let shape = expect_rank(c, "nodes", 3, Some(4))?;
    let (n, cs) = (shape[0], shape[1]);
    let raw = c.read_f32("nodes")?;
    let knots = c.read_f64("knot_vector")?;
    let degree = c
        .read_i32("spline_degree")?
        .first()
        .copied()
        .ok_or_else(|| invalid("spline_degree is empty"))?;
    let degree = usize::try_from(degree).map_err(|_| invalid(format!("negative spline degree {}", degree)))?;

    let mut control_points = Vec::with_capacity(n);
    let mut amplitudes = Vec::with_capacity(n);
    for scatterer in raw.chunks_exact(cs * 4) {
        amplitudes.push(scatterer[3]);
        control_points.push(
            scatterer
                .chunks_exact(4)
                .map(|p| Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64))
                .collect(),
        );
    }
    SplineScatterers::new(degree, knots, control_points, amplitudes)
        .map(Some)
        .map_err(invalid)
}

/// Write either or both scatterer sets into one file.
pub fn write_scatterers(
    path: &Path,
    fixed: Option<&FixedScatterers>,
    spline: Option<&SplineScatterers>,
) -> ContainerResult<()> {
    let mut w = ContainerWriter::new();
    if let Some(fixed) = fixed {
        let data = fixed
            .scatterers
            .iter()
            .flat_map(|s| [s.position.x as f32, s.position.y as f32, s.position.z as f32, s.amplitude])
            .collect();
        w.add_f32("data", &[fixed.len(), 4], data)?;
    }
    if let Some(spline) = spline {
        let cs = spline.num_control_points();
        let mut nodes = Vec::with_capacity(spline.len() * cs * 4);
        for idx in 0..spline.len() {
            let amp = spline.amplitude(idx);
            for p in spline.control_points(idx).unwrap_or_default() {
                nodes.extend_from_slice(&[p.x as f32, p.y as f32, p.z as f32, amp]);
            }
        }
        w.add_f32("nodes", &[spline.len(), cs, 4], nodes)?
            .add_f64("knot_vector", &[spline.knots().len()], spline.knots().to_vec())?
            .add_i32("spline_degree", &[1], vec![spline.degree() as i32])?;
    }
    w.write(path)
}

// ─── Excitation and beam profile ─────────────────────────────────────────────

pub fn load_excitation(path: &Path) -> ContainerResult<ExcitationSignal> {
    let c = Container::open(path)?;
    let samples = c.read_f32("samples")?;
    let fs = c.read_scalar("sampling_frequency")?;
    let center = c.read_scalar("center_index")?;
    let demod = c.read_scalar("demod_freq")?;
    if !(center >= 0.0 && center.fract() == 0.0) {
        return Err(invalid(format!("center_index {} is not a valid index", center)));
    }
    let exc = ExcitationSignal::new(samples, fs, center as usize, demod).map_err(invalid)?;
    debug!(path = %path.display(), samples = exc.samples.len(), "Excitation loaded");
    Ok(exc)
}

pub fn write_excitation(path: &Path, exc: &ExcitationSignal) -> ContainerResult<()> {
    let mut w = ContainerWriter::new();
    w.add_f32("samples", &[exc.samples.len()], exc.samples.clone())?
        .add_f64("sampling_frequency", &[1], vec![exc.sampling_frequency])?
        .add_i32("center_index", &[1], vec![exc.center_index as i32])?
        .add_f64("demod_freq", &[1], vec![exc.demod_freq])?;
    w.write(path)
}

pub fn load_beam_profile(path: &Path) -> ContainerResult<LutProfile> {
    let c = Container::open(path)?;
    let shape = expect_rank(&c, "beam_profile", 3, None)?;
    let dims = [shape[0], shape[1], shape[2]];
    let samples = c.read_f32("beam_profile")?;
    let ext = c.read_f32("extents")?;
    let extents: [f32; 6] = ext
        .as_slice()
        .try_into()
        .map_err(|_| invalid(format!("extents has {} values, expected 6", ext.len())))?;
    LutProfile::new(extents, dims, samples).map_err(invalid)
}

pub fn write_beam_profile(path: &Path, lut: &LutProfile) -> ContainerResult<()> {
    let mut w = ContainerWriter::new();
    w.add_f32("beam_profile", &lut.dims(), lut.samples().to_vec())?
        .add_f32("extents", &[6], lut.extents().to_vec())?;
    w.write(path)
}

// ─── IQ data ─────────────────────────────────────────────────────────────────

/// Frames read back from an IQ file
#[derive(Debug, Clone, PartialEq)]
pub struct IqRecording {
    pub frames: Vec<RawIqFrame>,
    /// Present only for files that carry `frame_times`
    pub frame_times: Option<Vec<f64>>,
}

/// Write frames as `iq_real`/`iq_imag` `[F, L, S]` plus `frame_times`.
///
/// Every frame must have the same shape and there must be one timestamp per
/// frame.
pub fn write_iq_frames(path: &Path, frames: &[RawIqFrame], frame_times: &[f64]) -> ContainerResult<()> {
    let first = frames.first().ok_or_else(|| invalid("no frames to write"))?;
    let (lines, samples) = first.shape();
    if let Some(bad) = frames.iter().position(|f| f.shape() != (lines, samples)) {
        return Err(invalid(format!(
            "frame {} has shape {:?}, expected {:?}",
            bad,
            frames[bad].shape(),
            (lines, samples)
        )));
    }
    if frame_times.len() != frames.len() {
        return Err(invalid(format!(
            "{} timestamps for {} frames",
            frame_times.len(),
            frames.len()
        )));
    }

    let total = frames.len() * lines * samples;
    let mut re = Vec::with_capacity(total);
    let mut im = Vec::with_capacity(total);
    for sample in frames.iter().flat_map(|f| f.lines().iter().flatten()) {
        re.push(sample.re);
        im.push(sample.im);
    }

    let shape = [frames.len(), lines, samples];
    let mut w = ContainerWriter::new();
    w.add_f32("iq_real", &shape, re)?
        .add_f32("iq_imag", &shape, im)?
        .add_f64("frame_times", &[frames.len()], frame_times.to_vec())?;
    w.write(path)?;
    info!(path = %path.display(), frames = frames.len(), lines, samples, "IQ frames written");
    Ok(())
}

/// Read IQ frames from either the recorded or the simulated-dump layout.
pub fn read_iq_frames(path: &Path) -> ContainerResult<IqRecording> {
    let c = Container::open(path)?;
    let recording = if c.contains("sim_data_real") {
        read_layout(&c, "sim_data_real", "sim_data_imag", true)?
    } else if c.contains("iq_real") {
        read_layout(&c, "iq_real", "iq_imag", false)?
    } else {
        return Err(ContainerError::MissingDataset("iq_real".to_string()));
    };
    debug!(path = %path.display(), frames = recording.frames.len(), "IQ frames read");
    Ok(recording)
}

fn read_layout(c: &Container, real: &str, imag: &str, sample_major: bool) -> ContainerResult<IqRecording> {
    let shape = c.shape(real)?.to_vec();
    if c.shape(imag)? != shape.as_slice() {
        return Err(invalid(format!("'{}' and '{}' differ in shape", real, imag)));
    }
    // [F, a, b] or [a, b] where (a, b) is (S, L) when sample-major
    let (num_frames, a, b) = match shape.as_slice() {
        [f, a, b] => (*f, *a, *b),
        [a, b] => (1, *a, *b),
        other => return Err(invalid(format!("'{}' has unsupported shape {:?}", real, other))),
    };
    let (num_lines, num_samples) = if sample_major { (b, a) } else { (a, b) };

    let re = c.read_f32(real)?;
    let im = c.read_f32(imag)?;
    let per_frame = a
        .checked_mul(b)
        .filter(|n| num_frames.checked_mul(*n) == Some(re.len()) && im.len() == re.len())
        .ok_or_else(|| invalid(format!("'{}' shape {:?} does not match its data", real, shape)))?;

    let mut frames = Vec::with_capacity(num_frames);
    for f in 0..num_frames {
        let base = f * per_frame;
        let lines: Vec<IqLine> = (0..num_lines)
            .map(|l| {
                (0..num_samples)
                    .map(|s| {
                        let idx = if sample_major {
                            base + s * num_lines + l
                        } else {
                            base + l * num_samples + s
                        };
                        IqSample::new(re[idx], im[idx])
                    })
                    .collect()
            })
            .collect();
        frames.push(RawIqFrame::from_lines(lines).map_err(invalid)?);
    }

    let frame_times = if c.contains("frame_times") {
        let times = c.read_f64("frame_times")?;
        if times.len() != num_frames {
            return Err(invalid(format!(
                "{} frame times for {} frames",
                times.len(),
                num_frames
            )));
        }
        Some(times)
    } else {
        None
    };
    Ok(IqRecording { frames, frame_times })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scatterers::LutProfile;

    fn frame(lines: usize, samples: usize, seed: f32) -> RawIqFrame {
        let data = (0..lines)
            .map(|l| {
                (0..samples)
                    .map(|s| IqSample::new(seed + l as f32 * 0.1 + s as f32, -(s as f32) * 1e-7))
                    .collect()
            })
            .collect();
        RawIqFrame::from_lines(data).unwrap()
    }

    #[test]
    fn test_iq_round_trip_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.escn");
        let frames = vec![frame(3, 5, 0.0), frame(3, 5, 7.0)];
        write_iq_frames(&path, &frames, &[0.0, 0.05]).unwrap();

        let rec = read_iq_frames(&path).unwrap();
        assert_eq!(rec.frames, frames);
        assert_eq!(rec.frame_times, Some(vec![0.0, 0.05]));

        let c = Container::open(&path).unwrap();
        assert_eq!(c.shape("iq_real").unwrap(), &[2, 3, 5]);
    }

    #[test]
    fn test_iq_write_rejects_mixed_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.escn");
        let frames = vec![frame(3, 5, 0.0), frame(3, 4, 0.0)];
        assert!(matches!(
            write_iq_frames(&path, &frames, &[0.0, 1.0]),
            Err(ContainerError::Format(_))
        ));
        assert!(!path.exists());
        assert!(write_iq_frames(&path, &[], &[]).is_err());
        assert!(write_iq_frames(&path, &[frame(1, 1, 0.0)], &[]).is_err());
    }

    #[test]
    fn test_sample_major_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.escn");
        // two lines, three samples, stored [S, L]
        let re = vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0];
        let im = vec![0.0; 6];
        let mut w = ContainerWriter::new();
        w.add_f32("sim_data_real", &[3, 2], re).unwrap();
        w.add_f32("sim_data_imag", &[3, 2], im).unwrap();
        w.write(&path).unwrap();

        let rec = read_iq_frames(&path).unwrap();
        assert_eq!(rec.frames.len(), 1);
        assert!(rec.frame_times.is_none());
        let f = &rec.frames[0];
        assert_eq!(f.shape(), (2, 3));
        assert_eq!(f.sample(1, 2).unwrap().re, 12.0);
        assert_eq!(f.sample(0, 1).unwrap().re, 1.0);
    }

    #[test]
    fn test_iq_overflowing_frame_shape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iq.escn");
        // zero frames keeps the element count at 0 while lines * samples overflows
        let mut w = ContainerWriter::new();
        w.add_f32("iq_real", &[0, usize::MAX, 2], vec![]).unwrap();
        w.add_f32("iq_imag", &[0, usize::MAX, 2], vec![]).unwrap();
        w.write(&path).unwrap();
        assert!(matches!(read_iq_frames(&path), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_iq_missing_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.escn");
        ContainerWriter::new().write(&path).unwrap();
        assert!(matches!(read_iq_frames(&path), Err(ContainerError::MissingDataset(_))));
    }

    #[test]
    fn test_scatterer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phantom.escn");
        let fixed = FixedScatterers::new(vec![
            FixedScatterer { position: Vector3::new(0.0, 0.0, 0.03125), amplitude: 1.0 },
            FixedScatterer { position: Vector3::new(0.0078125, 0.0, 0.0625), amplitude: -0.5 },
        ]);
        let spline = SplineScatterers::new(
            1,
            vec![0.0, 0.0, 1.0, 1.0],
            vec![vec![Vector3::zero(), Vector3::new(0.0, 0.0, 0.5)]],
            vec![0.25],
        )
        .unwrap();
        write_scatterers(&path, Some(&fixed), Some(&spline)).unwrap();

        let c = Container::open(&path).unwrap();
        let f = load_fixed_scatterers(&c).unwrap().unwrap();
        assert_eq!(f, fixed);
        let s = load_spline_scatterers(&c).unwrap().unwrap();
        assert_eq!(s.degree(), 1);
        assert_eq!(s.amplitude(0), 0.25);
        assert_eq!(s.control_points(0).unwrap()[1].z, 0.5);
    }

    #[test]
    fn test_fixed_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixed.escn");
        write_scatterers(&path, Some(&FixedScatterers::default()), None).unwrap();
        let c = Container::open(&path).unwrap();
        assert!(load_fixed_scatterers(&c).unwrap().unwrap().is_empty());
        assert!(load_spline_scatterers(&c).unwrap().is_none());
    }

    #[test]
    fn test_fixed_scatterers_bad_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.escn");
        let mut w = ContainerWriter::new();
        w.add_f32("data", &[2, 3], vec![0.0; 6]).unwrap();
        w.write(&path).unwrap();
        let c = Container::open(&path).unwrap();
        assert!(matches!(load_fixed_scatterers(&c), Err(ContainerError::Format(_))));
    }

    #[test]
    fn test_excitation_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exc.escn");
        let exc = ExcitationSignal::gaussian_pulse(2.5e6, 0.5, 50e6).unwrap();
        write_excitation(&path, &exc).unwrap();
        assert_eq!(load_excitation(&path).unwrap(), exc);
    }

    #[test]
    fn test_beam_profile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beam.escn");
        let lut = LutProfile::new([0.0, 0.1, -0.01, 0.01, -0.01, 0.01], [2, 1, 3], vec![0.5; 6]).unwrap();
        write_beam_profile(&path, &lut).unwrap();
        assert_eq!(load_beam_profile(&path).unwrap(), lut);
    }
}
