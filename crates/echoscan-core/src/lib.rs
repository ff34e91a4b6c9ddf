//! # echoscan core
//!
//! Data model shared by the simulation engine and the session controller:
//!
//! - **IQ frames**: complex baseband samples per scan-line
//! - **Scan geometry**: sector and linear layouts with Cartesian extent and
//!   the inverse mapping used for scan conversion
//! - **Probe motion**: pose of the probe as a function of time
//! - **Scan sequences**: timestamped world-space scan-lines built from a
//!   geometry and a probe pose
//! - **Time axis**: bounded simulation time with change notification
//! - **Configuration** and **observability** (logging, metrics)
//!
//! ## Data Flow
//!
//! ```text
//! TimeAxis ─► ScanSequenceBuilder ─► SimulationEngine ─► RawIqFrame ─► image formation
//!                  ▲        ▲
//!           ScanGeometry  PoseSource
//! ```
//!
//! ## Example
//!
//! ```rust
//! use echoscan_core::{ProbeMotion, ScanGeometry, ScanSequenceBuilder};
//!
//! let geometry = ScanGeometry::Linear { width: 0.04, range_max: 0.06 };
//! let builder = ScanSequenceBuilder::new(1540.0);
//! let seq = builder
//!     .build(&geometry, 64, 0.0, &ProbeMotion::default(), false)
//!     .unwrap();
//! assert_eq!(seq.num_lines(), 64);
//! ```

pub mod config;
pub mod geometry;
pub mod observe;
pub mod probe;
pub mod scan_sequence;
pub mod time_axis;
pub mod types;
pub mod vector;

pub use config::{ConfigError, SessionConfig};
pub use geometry::{LocalLine, ScanGeometry, XyExtent};
pub use probe::{Pose, PoseSource, ProbeMotion};
pub use scan_sequence::{ScanLine, ScanSequence, ScanSequenceBuilder, DEFAULT_SOUND_SPEED};
pub use time_axis::{TimeAxis, TimeEvent, TimeObserver};
pub use types::{CoreError, CoreResult, IqLine, IqSample, RawIqFrame};
pub use vector::{Rotation, Vector3};
