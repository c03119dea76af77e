// ABOUTME: Generic expiring JSON state store over a key-value backend
// ABOUTME: Converts every backend or encoding failure into a result value instead of an error

use crate::backend::KeyValueBackend;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// JSON key-value cache shared by every process pointing at the same backend.
///
/// The store is a best-effort mirror, never a source of truth: reads that fail
/// for any reason come back as `None`, and writes report success as a `bool`.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn KeyValueBackend>,
    default_ttl_secs: u64,
}

impl StateStore {
    pub const DEFAULT_TTL_SECS: u64 = 3600;

    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self::with_default_ttl(backend, Self::DEFAULT_TTL_SECS)
    }

    pub fn with_default_ttl(backend: Arc<dyn KeyValueBackend>, default_ttl_secs: u64) -> Self {
        Self {
            backend,
            default_ttl_secs,
        }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    /// TTL actually applied for a requested TTL. Zero falls back to the default
    /// so that no key is ever written without expiry.
    pub fn effective_ttl(&self, ttl_secs: Option<u64>) -> u64 {
        match ttl_secs {
            Some(ttl) if ttl > 0 => ttl,
            _ => self.default_ttl_secs,
        }
    }

    /// Read and decode a value. Missing keys, undecodable payloads and backend
    /// failures all yield `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                warn!(key, "State store read failed: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, "Discarding undecodable state value: {}", e);
                None
            }
        }
    }

    /// Encode and store a value with the given TTL (default TTL when `None` or zero)
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(key, "Cannot encode state value: {}", e);
                return false;
            }
        };

        match self
            .backend
            .set(key, serialized, self.effective_ttl(ttl_secs))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(key, "State store write failed: {}", e);
                false
            }
        }
    }

    /// Remove a key, returning whether it was present
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key, "State store delete failed: {}", e);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key, "State store exists check failed: {}", e);
                false
            }
        }
    }

    pub async fn increment(&self, key: &str) -> Result<i64> {
        self.backend.increment(key).await.inspect_err(|e| {
            warn!(key, "State store increment failed: {}", e);
        })
    }

    pub async fn decrement(&self, key: &str) -> Result<i64> {
        self.backend.decrement(key).await.inspect_err(|e| {
            warn!(key, "State store decrement failed: {}", e);
        })
    }
}
