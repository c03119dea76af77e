// ABOUTME: Error types for sandbox lifecycle operations
// ABOUTME: Typed failures behind the bool/Option results of the lifecycle manager

use crate::runtime::RuntimeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// Pool is full; the runtime was not contacted
    #[error("Sandbox capacity exceeded: {active} of {max} instances in use")]
    CapacityExceeded { active: usize, max: usize },

    #[error("Failed to create sandbox: {0}")]
    RuntimeCreateFailure(#[source] RuntimeError),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Sandbox {0} is already being stopped")]
    AlreadyStopping(String),

    #[error("Failed to stop sandbox {id}: {source}")]
    RuntimeStopFailure {
        id: String,
        #[source]
        source: RuntimeError,
    },
}

pub type Result<T> = std::result::Result<T, SandboxError>;
