//! Image formation transforms
//!
//! ```text
//! B-mode:  |iq| ─► 20·log10(env / norm) + gain ─► dyn range ─► 0..255 ─► scan conversion
//! Color:   packet ─► lag-one autocorrelation ─► phase, power ─► threshold ─► red / blue
//! ```
//!
//! Scan conversion walks the output raster and looks up the nearest beam
//! sample through [`ScanGeometry::beam_coordinates`]. Row 0 is the shallowest
//! depth.

use echoscan_core::{RawIqFrame, ScanGeometry, XyExtent};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use num_complex::Complex32;
use std::f32::consts::PI;

use crate::task::{BModeImage, BModeTask, ColorImage, ColorTask, WorkResult, WorkTask};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Run the transform matching the task kind.
pub fn form(task: &WorkTask, task_id: u64) -> WorkResult {
    match task {
        WorkTask::BMode(t) => WorkResult::BModeImage(form_bmode(t, task_id)),
        WorkTask::ColorDoppler(t) => WorkResult::ColorImage(form_color(t, task_id)),
    }
}

/// Raster size for `extent`, scaled down so neither side exceeds `max_side`.
pub fn raster_size(extent: &XyExtent, dots_per_meter: f64, max_side: u32) -> (u32, u32) {
    let max_side = max_side.max(1) as f64;
    let mut w = (extent.width() * dots_per_meter).ceil().max(1.0);
    let mut h = (extent.height() * dots_per_meter).ceil().max(1.0);
    let scale = (max_side / w.max(h)).min(1.0);
    w = (w * scale).round().max(1.0);
    h = (h * scale).round().max(1.0);
    (w as u32, h as u32)
}

/// Nearest `(line, sample)` for every pixel, `None` outside the scanned region.
fn pixel_lookup(
    geometry: &ScanGeometry,
    num_lines: usize,
    num_samples: usize,
    width: u32,
    height: u32,
) -> Vec<Option<(usize, usize)>> {
    let extent = geometry.xy_extent();
    let dx = extent.width() / width as f64;
    let dy = extent.height() / height as f64;
    let mut table = Vec::with_capacity(width as usize * height as usize);
    for py in 0..height {
        let y = extent.y_min + (py as f64 + 0.5) * dy;
        for px in 0..width {
            let x = extent.x_min + (px as f64 + 0.5) * dx;
            let entry = geometry.beam_coordinates(x, y, num_lines).map(|(line, frac)| {
                let line = (line.round() as usize).min(num_lines - 1);
                let sample = ((frac * (num_samples - 1) as f64).round() as usize).min(num_samples - 1);
                (line, sample)
            });
            table.push(entry);
        }
    }
    table
}

/// Log-compress one envelope value to a gray level.
#[inline]
fn gray_level(env: f32, norm: f32, gain: f32, dynamic_range: f32) -> u8 {
    if env <= 0.0 {
        return 0;
    }
    let db = 20.0 * (env / norm).log10() + gain;
    let dr = dynamic_range.max(f32::EPSILON);
    (((db + dr) / dr).clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn form_bmode(task: &BModeTask, task_id: u64) -> BModeImage {
    let p = &task.params;
    let extent = task.geometry.xy_extent();
    let (width, height) = raster_size(&extent, p.dots_per_meter, p.max_image_side);
    let frame = &task.frame;

    let max_env = frame.max_magnitude();
    let updated_normalization_const = p.auto_normalize.then(|| {
        if max_env > 0.0 && max_env.is_finite() {
            max_env
        } else {
            p.normalization_const
        }
    });

    let mut image = GrayImage::new(width, height);
    if frame.is_empty() {
        return BModeImage { task_id, sim_time: task.sim_time, image, extent, updated_normalization_const };
    }

    let norm = if p.normalization_const > 0.0 && p.normalization_const.is_finite() {
        p.normalization_const
    } else {
        1.0
    };
    // beam-space gray levels, then scan conversion
    let levels: Vec<Vec<u8>> = frame
        .lines()
        .iter()
        .map(|line| {
            line.iter()
                .map(|s| gray_level(s.norm(), norm, p.gain, p.dynamic_range))
                .collect()
        })
        .collect();

    let lookup = pixel_lookup(&task.geometry, frame.num_lines(), frame.num_samples(), width, height);
    for (pixel, entry) in image.pixels_mut().zip(lookup) {
        if let Some((l, s)) = entry {
            *pixel = Luma([levels[l][s]]);
        }
    }

    BModeImage { task_id, sim_time: task.sim_time, image, extent, updated_normalization_const }
}

/// Kasai estimate per `(line, sample)`: mean phase shift and mean power.
pub fn kasai_estimate(frames: &[RawIqFrame]) -> Option<Vec<Vec<(f32, f32)>>> {
    let first = frames.first()?;
    if frames.len() < 2 || frames.iter().any(|f| f.shape() != first.shape()) || first.is_empty() {
        return None;
    }
    let (num_lines, num_samples) = first.shape();
    let n = frames.len() as f32;
    let estimates = (0..num_lines)
        .map(|l| {
            (0..num_samples)
                .map(|s| {
                    let mut r1 = Complex32::new(0.0, 0.0);
                    let mut power = 0.0f32;
                    let mut prev: Option<Complex32> = None;
                    for frame in frames {
                        let x = frame.lines()[l][s];
                        power += x.norm_sqr();
                        if let Some(p) = prev {
                            r1 += x * p.conj();
                        }
                        prev = Some(x);
                    }
                    (r1.arg(), power / n)
                })
                .collect()
        })
        .collect();
    Some(estimates)
}

pub fn form_color(task: &ColorTask, task_id: u64) -> ColorImage {
    let p = &task.params;
    let extent = task.geometry.xy_extent();
    let (width, height) = raster_size(&extent, p.dots_per_meter, p.max_image_side);
    let mut image = RgbaImage::from_pixel(width, height, TRANSPARENT);

    let Some(estimates) = kasai_estimate(&task.frames) else {
        return ColorImage { task_id, sim_time: task.sim_time, image, extent };
    };
    let max_power = estimates
        .iter()
        .flatten()
        .map(|&(_, power)| power)
        .fold(0.0f32, f32::max);
    let threshold = p.power_threshold.max(0.0) * max_power;

    let colors: Vec<Vec<Rgba<u8>>> = estimates
        .iter()
        .map(|line| {
            line.iter()
                .map(|&(phase, power)| {
                    if power <= 0.0 || power < threshold {
                        return TRANSPARENT;
                    }
                    let level = ((phase.abs() / PI).clamp(0.0, 1.0) * 255.0).round() as u8;
                    if phase >= 0.0 {
                        Rgba([level, 0, 0, 255])
                    } else {
                        Rgba([0, 0, level, 255])
                    }
                })
                .collect()
        })
        .collect();

    let (num_lines, num_samples) = (estimates.len(), estimates[0].len());
    let lookup = pixel_lookup(&task.geometry, num_lines, num_samples, width, height);
    for (pixel, entry) in image.pixels_mut().zip(lookup) {
        if let Some((l, s)) = entry {
            *pixel = colors[l][s];
        }
    }

    ColorImage { task_id, sim_time: task.sim_time, image, extent }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BModeParams, ColorParams};
    use echoscan_core::IqSample;

    fn linear() -> ScanGeometry {
        ScanGeometry::Linear { width: 0.02, range_max: 0.04 }
    }

    fn constant_frame(lines: usize, samples: usize, value: IqSample) -> RawIqFrame {
        RawIqFrame::from_lines(vec![vec![value; samples]; lines]).unwrap()
    }

    fn params() -> BModeParams {
        BModeParams {
            dots_per_meter: 1000.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_raster_size() {
        let extent = linear().xy_extent();
        assert_eq!(raster_size(&extent, 1000.0, 2048), (20, 40));
        assert_eq!(raster_size(&extent, 1000.0, 20), (10, 20));
        assert_eq!(raster_size(&extent, 0.0, 2048), (1, 1));
    }

    #[test]
    fn test_gray_level_mapping() {
        assert_eq!(gray_level(1.0, 1.0, 0.0, 50.0), 255);
        assert_eq!(gray_level(0.0, 1.0, 0.0, 50.0), 0);
        // -25 dB is half way through a 50 dB range
        let half = gray_level(10f32.powf(-25.0 / 20.0), 1.0, 0.0, 50.0);
        assert!((127..=128).contains(&half));
        // gain shifts the curve
        assert!(gray_level(0.01, 1.0, 20.0, 50.0) > gray_level(0.01, 1.0, 0.0, 50.0));
    }

    #[test]
    fn test_bmode_deterministic() {
        let task = BModeTask {
            geometry: linear(),
            frame: constant_frame(4, 16, IqSample::new(0.5, 0.0)),
            params: params(),
            sim_time: 0.0,
        };
        let a = form_bmode(&task, 0);
        let b = form_bmode(&task, 1);
        assert_eq!(a.image, b.image);
        assert_eq!(a.image.dimensions(), (20, 40));
        assert_eq!(a.extent, linear().xy_extent());
    }

    #[test]
    fn test_auto_normalize_reports_peak() {
        let mut task = BModeTask {
            geometry: linear(),
            frame: constant_frame(2, 4, IqSample::new(3.0, 4.0)),
            params: params(),
            sim_time: 0.0,
        };
        assert_eq!(form_bmode(&task, 0).updated_normalization_const, Some(5.0));

        task.params.auto_normalize = false;
        assert_eq!(form_bmode(&task, 0).updated_normalization_const, None);

        task.params.auto_normalize = true;
        task.frame = constant_frame(2, 4, IqSample::new(0.0, 0.0));
        assert_eq!(form_bmode(&task, 0).updated_normalization_const, Some(1.0));
    }

    #[test]
    fn test_sector_corners_black() {
        let task = BModeTask {
            geometry: ScanGeometry::Sector { width: 1.0, radial_length: 0.04, tilt: 0.0 },
            frame: constant_frame(8, 32, IqSample::new(1.0, 0.0)),
            params: params(),
            sim_time: 0.0,
        };
        let img = form_bmode(&task, 0).image;
        let (w, h) = img.dimensions();
        // shallow corners lie outside the fan, the bottom centre inside
        assert_eq!(img.get_pixel(0, 0).0[0], 0);
        assert_eq!(img.get_pixel(w - 1, 0).0[0], 0);
        assert_eq!(img.get_pixel(w / 2, h - 2).0[0], 255);
    }

    fn rotating_packet(step: f32, n: usize) -> Vec<RawIqFrame> {
        (0..n)
            .map(|k| constant_frame(2, 4, IqSample::from_polar(1.0, step * k as f32)))
            .collect()
    }

    #[test]
    fn test_kasai_phase() {
        let est = kasai_estimate(&rotating_packet(0.5, 6)).unwrap();
        let (phase, power) = est[1][2];
        assert!((phase - 0.5).abs() < 1e-5);
        assert!((power - 1.0).abs() < 1e-5);
        assert!(kasai_estimate(&rotating_packet(0.5, 1)).is_none());
    }

    #[test]
    fn test_color_direction() {
        let mut task = ColorTask {
            geometry: linear(),
            frames: rotating_packet(0.5, 4),
            params: ColorParams { dots_per_meter: 1000.0, ..Default::default() },
            sim_time: 0.0,
        };
        let img = form_color(&task, 0).image;
        let px = img.get_pixel(10, 20);
        assert!(px.0[0] > 0 && px.0[2] == 0 && px.0[3] == 255);

        task.frames = rotating_packet(-0.5, 4);
        let img = form_color(&task, 0).image;
        let px = img.get_pixel(10, 20);
        assert!(px.0[2] > 0 && px.0[0] == 0);
    }

    #[test]
    fn test_color_inconsistent_packet_transparent() {
        let mut frames = rotating_packet(0.5, 3);
        frames.push(constant_frame(3, 4, IqSample::new(1.0, 0.0)));
        let task = ColorTask {
            geometry: linear(),
            frames,
            params: ColorParams { dots_per_meter: 1000.0, ..Default::default() },
            sim_time: 0.0,
        };
        let img = form_color(&task, 0).image;
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }
}
