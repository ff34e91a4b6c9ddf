//! # echoscan sim
//!
//! Simulation side of echoscan:
//!
//! - [`SimulationEngine`]: the boundary every backend implements
//! - [`ReferenceSimulator`]: multi-threaded CPU point-scatterer simulator
//! - scatterer, beam and excitation models
//! - [`Phantom`]: generated or loaded scatterer sets
//! - a structured binary container and the named datasets stored in it

pub mod container;
pub mod datasets;
pub mod engine;
pub mod phantom;
pub mod scatterers;
pub mod simulator;

pub use container::{Container, ContainerError, ContainerResult, ContainerWriter};
pub use datasets::{read_iq_frames, write_iq_frames, IqRecording};
pub use engine::{
    apply_engine_config, create_engine, EngineKind, HardwareInfo, SimError, SimResult,
    SimulationEngine,
};
pub use phantom::Phantom;
pub use scatterers::{
    BeamProfile, ExcitationSignal, FixedScatterer, FixedScatterers, GaussianProfile, LutProfile,
    SplineScatterers,
};
pub use simulator::{baseband_pulse, ReferenceSimulator};
