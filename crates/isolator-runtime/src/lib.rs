use bollard::errors::Error as BollardError;
use isolator_common::IsolatorError;
use thiserror::Error;

// Re-export dependencies potentially needed by consumers
pub use bollard;
pub use isolator_common as common;

pub mod client;
pub mod docker;
pub mod health;
pub mod lifecycle;
pub mod resources;
pub mod stats;
pub mod test_utils;
pub mod volume;

pub use client::{
    ContainerDetails, ContainerSpec, ContainerSummary, ExposedPort, HealthState, HostBinding,
    NetworkCounters, RawStats, ResourceCaps, RuntimeClient, RuntimeState, VolumeBind,
};
pub use docker::DockerRuntime;
pub use health::{HealthProber, Readiness};
pub use lifecycle::{LifecycleManager, Transition};
pub use resources::{AppConfig, ResourceLimitTranslator};
pub use stats::ContainerStats;
pub use volume::VolumeAllocator;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("No such container or image: {0}")]
    NotFound(String),
    #[error("Container runtime error: {0}")]
    Engine(String),
}

impl From<BollardError> for RuntimeError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            BollardError::DockerResponseServerError { message, .. } => {
                RuntimeError::Engine(message)
            }
            BollardError::DockerStreamError { error } => RuntimeError::Engine(error),
            // Everything else is transport-level: socket, timeout, decoding.
            other => RuntimeError::Unavailable(other.to_string()),
        }
    }
}

impl From<RuntimeError> for IsolatorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => IsolatorError::RuntimeUnavailable(msg),
            RuntimeError::NotFound(msg) => IsolatorError::ContainerNotFound(msg),
            RuntimeError::Engine(msg) => IsolatorError::Runtime(msg),
        }
    }
}

// Define local Result using the crate's Error type
pub type Result<T> = std::result::Result<T, RuntimeError>;
