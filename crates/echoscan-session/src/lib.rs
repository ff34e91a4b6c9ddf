//! # echoscan session
//!
//! Drives an ultrasound simulation session:
//!
//! - [`SessionController`]: owns the engine, builds scan sequences from the
//!   time axis, runs B-mode and color Doppler acquisitions and dispatches
//!   them as one all-or-nothing request
//! - [`ImageFormationPipeline`]: background worker that turns raw IQ into
//!   grayscale and color images, in submission order
//! - [`IqAccumulator`]: records B-mode frames for export
//! - [`PlaybackLoop`]: timer-driven ticks
//!
//! ```text
//!  SessionController ──WorkTask──► ImageFormationPipeline ──WorkResult──► subscribers
//!        │    ▲                                                   │
//!        ▼    └────────────── NormalizationFeedback ◄─────────────┘
//!   IqAccumulator
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use echoscan_core::observe::SessionMetrics;
//! use echoscan_core::SessionConfig;
//! use echoscan_session::{result_channel, ImageFormationPipeline, SessionController};
//! use std::sync::Arc;
//!
//! let config = SessionConfig::default();
//! let metrics = Arc::new(SessionMetrics::new());
//! let (subscriber, results) = result_channel();
//! let pipeline = ImageFormationPipeline::spawn(subscriber, Arc::clone(&metrics), 10).unwrap();
//! let mut session = SessionController::from_config(&config, Box::new(pipeline))
//!     .unwrap()
//!     .with_metrics(metrics);
//! session.simulate().unwrap();
//! let _images = results.poll();
//! ```

pub mod accumulator;
pub mod acquisition;
pub mod controller;
pub mod error;
pub mod formation;
pub mod image_saver;
pub mod pipeline;
pub mod playback;
pub mod task;

#[cfg(test)]
mod testing;

pub use accumulator::IqAccumulator;
pub use controller::{AcquisitionReport, DisplaySettings, SessionController, SessionState};
pub use error::{SessionError, SessionResult};
pub use image_saver::ImageSaver;
pub use pipeline::{
    result_channel, FeedbackSubscriber, ImageFormationPipeline, NormalizationFeedback,
    PipelineSubscriber, ResultReceiver, TaskSink,
};
pub use playback::{PlaybackLoop, PlaybackSummary};
pub use task::{BModeParams, ColorParams, WorkResult, WorkTask};
