// ABOUTME: Error types for thread persistence and sandbox synchronization
// ABOUTME: StorageError wraps database failures, SyncError covers lifecycle transitions

use crate::models::ThreadStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A conditional update matched no row
    #[error("Conflicting update: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No sandbox available for thread {0}")]
    SandboxUnavailable(i64),

    #[error("Failed to stop sandbox {sandbox_id} for thread {thread_id}")]
    StopFailed { thread_id: i64, sandbox_id: String },

    #[error("Thread {thread_id} has no sandbox")]
    NoSandbox { thread_id: i64 },

    #[error("Thread {thread_id} is {status}, expected {expected}")]
    InvalidState {
        thread_id: i64,
        status: ThreadStatus,
        expected: &'static str,
    },

    #[error("Agent {agent_id} reached its limit of {limit} running threads")]
    ThreadLimitReached { agent_id: i64, limit: usize },
}
