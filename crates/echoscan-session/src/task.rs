//! Work items exchanged with the image formation pipeline

use echoscan_core::config::{BModeConfig, ColorConfig, DisplayConfig};
use echoscan_core::{RawIqFrame, ScanGeometry, XyExtent};
use image::{GrayImage, RgbaImage};

/// Grayscale mapping and rasterization settings for one B-mode task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BModeParams {
    /// Envelope value mapped to 0 dB
    pub normalization_const: f32,
    pub dynamic_range: f32,
    pub gain: f32,
    pub auto_normalize: bool,
    pub dots_per_meter: f64,
    pub max_image_side: u32,
}

impl Default for BModeParams {
    fn default() -> Self {
        Self::from_config(&BModeConfig::default(), &DisplayConfig::default())
    }
}

impl BModeParams {
    pub fn from_config(bmode: &BModeConfig, display: &DisplayConfig) -> Self {
        Self {
            normalization_const: bmode.normalization_const,
            dynamic_range: bmode.dynamic_range,
            gain: bmode.gain,
            auto_normalize: bmode.auto_normalize,
            dots_per_meter: display.dots_per_meter,
            max_image_side: display.max_image_side,
        }
    }
}

/// Rasterization settings for one color-Doppler task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorParams {
    /// Pixels below this fraction of the peak power are transparent
    pub power_threshold: f32,
    pub dots_per_meter: f64,
    pub max_image_side: u32,
}

impl Default for ColorParams {
    fn default() -> Self {
        Self::from_config(&ColorConfig::default(), &DisplayConfig::default())
    }
}

impl ColorParams {
    pub fn from_config(color: &ColorConfig, display: &DisplayConfig) -> Self {
        Self {
            power_threshold: color.power_threshold,
            dots_per_meter: display.dots_per_meter,
            max_image_side: display.max_image_side,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BModeTask {
    pub geometry: ScanGeometry,
    pub frame: RawIqFrame,
    pub params: BModeParams,
    /// Simulation time the frame was acquired at
    pub sim_time: f64,
}

#[derive(Debug, Clone)]
pub struct ColorTask {
    pub geometry: ScanGeometry,
    /// One frame per packet, in firing order
    pub frames: Vec<RawIqFrame>,
    pub params: ColorParams,
    pub sim_time: f64,
}

/// Unit of work for the pipeline, consumed exactly once
#[derive(Debug, Clone)]
pub enum WorkTask {
    BMode(BModeTask),
    ColorDoppler(ColorTask),
}

impl WorkTask {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkTask::BMode(_) => "bmode",
            WorkTask::ColorDoppler(_) => "color",
        }
    }

    pub fn sim_time(&self) -> f64 {
        match self {
            WorkTask::BMode(t) => t.sim_time,
            WorkTask::ColorDoppler(t) => t.sim_time,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BModeImage {
    /// Id the pipeline assigned to the originating task
    pub task_id: u64,
    pub sim_time: f64,
    pub image: GrayImage,
    pub extent: XyExtent,
    /// Set when the task asked for auto-normalization
    pub updated_normalization_const: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ColorImage {
    pub task_id: u64,
    pub sim_time: f64,
    pub image: RgbaImage,
    pub extent: XyExtent,
}

/// Formation output, exactly one per task
#[derive(Debug, Clone)]
pub enum WorkResult {
    BModeImage(BModeImage),
    ColorImage(ColorImage),
}

impl WorkResult {
    pub fn task_id(&self) -> u64 {
        match self {
            WorkResult::BModeImage(r) => r.task_id,
            WorkResult::ColorImage(r) => r.task_id,
        }
    }

    pub fn extent(&self) -> XyExtent {
        match self {
            WorkResult::BModeImage(r) => r.extent,
            WorkResult::ColorImage(r) => r.extent,
        }
    }
}
