//! PNG output for formed images
//!
//! Images land in one directory as `bmode_00000.png`, `color_00000.png`, ...
//! numbered per mode in arrival order. A `parameters.ini` with the physical
//! image size is written next to the first image.

use echoscan_core::XyExtent;
use image::ImageFormat;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SessionResult;
use crate::pipeline::PipelineSubscriber;
use crate::task::WorkResult;

pub const PARAMETERS_FILE: &str = "parameters.ini";

/// Write the physical width and height of the imaged region.
pub fn write_parameters(dir: &Path, extent: &XyExtent) -> SessionResult<()> {
    let mut file = fs::File::create(dir.join(PARAMETERS_FILE))?;
    writeln!(file, "width_meters = {}", extent.width())?;
    writeln!(file, "height_meters = {}", extent.height())?;
    Ok(())
}

/// Pipeline subscriber that saves every image it receives
pub struct ImageSaver {
    dir: PathBuf,
    bmode_count: usize,
    color_count: usize,
    parameters_written: bool,
}

impl ImageSaver {
    pub fn new(dir: impl Into<PathBuf>) -> SessionResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            bmode_count: 0,
            color_count: 0,
            parameters_written: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save(&mut self, result: &WorkResult) -> SessionResult<PathBuf> {
        if !self.parameters_written {
            write_parameters(&self.dir, &result.extent())?;
            self.parameters_written = true;
        }
        let path = match result {
            WorkResult::BModeImage(img) => {
                let path = self.dir.join(format!("bmode_{:05}.png", self.bmode_count));
                img.image.save_with_format(&path, ImageFormat::Png)?;
                self.bmode_count += 1;
                path
            }
            WorkResult::ColorImage(img) => {
                let path = self.dir.join(format!("color_{:05}.png", self.color_count));
                img.image.save_with_format(&path, ImageFormat::Png)?;
                self.color_count += 1;
                path
            }
        };
        Ok(path)
    }

    fn handle(&mut self, result: WorkResult) {
        match self.save(&result) {
            Ok(path) => debug!(task = result.task_id(), path = %path.display(), "Image saved"),
            Err(e) => warn!(task = result.task_id(), error = %e, "Failed to save image"),
        }
    }
}

impl PipelineSubscriber for ImageSaver {
    fn on_bmode_ready(&mut self, result: WorkResult) {
        self.handle(result);
    }

    fn on_color_ready(&mut self, result: WorkResult) {
        self.handle(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BModeImage, ColorImage};
    use image::{GrayImage, RgbaImage};

    fn extent() -> XyExtent {
        XyExtent { x_min: -0.02, x_max: 0.02, y_min: 0.0, y_max: 0.05 }
    }

    fn bmode(id: u64) -> WorkResult {
        WorkResult::BModeImage(BModeImage {
            task_id: id,
            sim_time: 0.0,
            image: GrayImage::from_pixel(4, 5, image::Luma([128])),
            extent: extent(),
            updated_normalization_const: None,
        })
    }

    #[test]
    fn test_saves_numbered_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = ImageSaver::new(dir.path().join("out")).unwrap();
        saver.on_bmode_ready(bmode(0));
        saver.on_bmode_ready(bmode(1));
        saver.on_color_ready(WorkResult::ColorImage(ColorImage {
            task_id: 2,
            sim_time: 0.0,
            image: RgbaImage::new(4, 5),
            extent: extent(),
        }));

        let out = saver.dir();
        assert!(out.join("bmode_00000.png").exists());
        assert!(out.join("bmode_00001.png").exists());
        assert!(out.join("color_00000.png").exists());

        let img = image::open(out.join("bmode_00001.png")).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (4, 5));
        assert_eq!(img.get_pixel(0, 0).0, [128]);
    }

    #[test]
    fn test_parameters_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = ImageSaver::new(dir.path()).unwrap();
        saver.on_bmode_ready(bmode(0));
        let text = fs::read_to_string(dir.path().join(PARAMETERS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["width_meters = 0.04", "height_meters = 0.05"]);
    }
}
