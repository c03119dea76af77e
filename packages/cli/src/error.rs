// ABOUTME: Error types for orchestrator startup
// ABOUTME: Wraps configuration, state store, runtime and storage failures

use replinet_config::ConfigError;
use replinet_sandbox::RuntimeError;
use replinet_state::StateError;
use replinet_threads::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Thread storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
