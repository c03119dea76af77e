// ABOUTME: Cross-process state cache and work queue built on a key-value backend
// ABOUTME: Exposes StateStore, SandboxStateCache and TaskQueue over memory or Redis backends

pub mod backend;
pub mod error;
pub mod queue;
pub mod sandbox_state;
pub mod store;

pub use backend::{KeyValueBackend, MemoryBackend, RedisBackend};
pub use error::{Result, StateError};
pub use queue::TaskQueue;
pub use sandbox_state::SandboxStateCache;
pub use store::StateStore;
