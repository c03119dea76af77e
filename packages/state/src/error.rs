// ABOUTME: Error types for the state store and task queue
// ABOUTME: Distinguishes encoding failures, backend outages and key type mismatches

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("Operation against a key holding the wrong kind of value: {0}")]
    WrongType(String),

    #[error("Value at {0} is not an integer")]
    NotAnInteger(String),

    #[error("Increment or decrement of {0} would overflow")]
    Overflow(String),
}

impl From<redis::RedisError> for StateError {
    fn from(err: redis::RedisError) -> Self {
        match err.code() {
            Some("WRONGTYPE") => StateError::WrongType(err.to_string()),
            _ => StateError::Unavailable(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
