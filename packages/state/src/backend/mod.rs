// ABOUTME: Key-value backend capability trait consumed by the state store and task queue
// ABOUTME: Mirrors the GET/SET EX/DEL/EXISTS/INCR/DECR/LPUSH/RPOP/LLEN command set

use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod redis_backend;

pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

/// Narrow key-value protocol the orchestration services depend on.
///
/// Implementations must make `list_pop` and `get_del` atomic with respect to
/// other clients so that concurrent queue consumers never observe the same task.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Fetch a string value, `None` when the key is missing or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value that expires after `ttl_secs`
    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically add one, creating the counter at zero if missing
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Atomically subtract one, creating the counter at zero if missing
    async fn decrement(&self, key: &str) -> Result<i64>;

    /// Push onto the head of a list, returning the new length
    async fn list_push(&self, key: &str, value: String) -> Result<u64>;

    /// Pop from the tail of a list
    async fn list_pop(&self, key: &str) -> Result<Option<String>>;

    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Fetch and remove a string value in one step
    async fn get_del(&self, key: &str) -> Result<Option<String>>;
}
