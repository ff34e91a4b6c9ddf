//! Session error types

use echoscan_core::CoreError;
use echoscan_sim::{ContainerError, SimError};

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session controller and its components
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("IQ buffer is empty")]
    EmptyAccumulator,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("No scatterers in {0}")]
    NoScatterers(String),

    #[error("Engine creation failed: {0}")]
    EngineCreation(String),

    #[error("Image formation pipeline has shut down")]
    PipelineClosed,
}

impl From<CoreError> for SessionError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidGeometry(msg) => SessionError::InvalidGeometry(msg),
            CoreError::ShapeMismatch(msg) => SessionError::ShapeMismatch(msg),
        }
    }
}

impl From<ContainerError> for SessionError {
    fn from(e: ContainerError) -> Self {
        SessionError::Io(e.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e.to_string())
    }
}

impl From<image::ImageError> for SessionError {
    fn from(e: image::ImageError) -> Self {
        SessionError::Io(e.to_string())
    }
}

impl SessionError {
    /// Whether the error came from the simulation engine.
    pub fn is_simulation(&self) -> bool {
        matches!(self, SessionError::Simulation(_))
    }
}
