// ABOUTME: Thread and agent state for Replinet with sandbox lifecycle synchronization
// ABOUTME: Exposes the persistence seam, its SQLite implementation and the synchronizer

pub mod error;
pub mod models;
pub mod storage;
pub mod synchronizer;

pub use error::{StorageError, SyncError};
pub use models::{Agent, NewAgent, Thread, ThreadCompletion, ThreadStatus};
pub use storage::{SqliteThreadStore, ThreadStore};
pub use synchronizer::{ThreadSynchronizer, DEFAULT_MAX_THREADS_PER_AGENT};
