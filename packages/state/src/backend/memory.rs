// ABOUTME: In-process key-value backend with expiry for tests and single-node deployments
// ABOUTME: Follows Redis semantics for counters, lists and type mismatches

use super::KeyValueBackend;
use crate::error::{Result, StateError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Key-value backend held entirely in process memory.
///
/// Expiry uses `tokio::time::Instant`, so tests running with a paused clock can
/// advance time to observe TTL behaviour.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
    }

    /// Drop the entry for `key` if it has expired and return what is left
    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        Self::purge_if_expired(entries, key);
        entries.get_mut(key)
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at: None,
        });

        match &mut entry.value {
            Value::Str(current) => {
                let parsed: i64 = current
                    .parse()
                    .map_err(|_| StateError::NotAnInteger(key.to_string()))?;
                let next = parsed
                    .checked_add(delta)
                    .ok_or_else(|| StateError::Overflow(key.to_string()))?;
                *current = next.to_string();
                Ok(next)
            }
            Value::List(_) => Err(StateError::WrongType(key.to_string())),
        }
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(StateError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key).is_some())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.add(key, 1).await
    }

    async fn decrement(&self, key: &str) -> Result<i64> {
        self.add(key, -1).await
    }

    async fn list_push(&self, key: &str, value: String) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        Self::purge_if_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });

        match &mut entry.value {
            Value::List(items) => {
                items.push_front(value);
                Ok(items.len() as u64)
            }
            Value::Str(_) => Err(StateError::WrongType(key.to_string())),
        }
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        let (popped, now_empty) = match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => {
                let popped = items.pop_back();
                (popped, items.is_empty())
            }
            Some(_) => return Err(StateError::WrongType(key.to_string())),
            None => return Ok(None),
        };

        // Empty lists do not exist, same as in Redis
        if now_empty {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.len() as u64),
            Some(_) => Err(StateError::WrongType(key.to_string())),
            None => Ok(0),
        }
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry {
                value: Value::List(_),
                ..
            }) => return Err(StateError::WrongType(key.to_string())),
            Some(_) => {}
            None => return Ok(None),
        }

        match entries.remove(key) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::new();

        backend.set("k", "v".to_string(), 60).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
        assert!(backend.exists("k").await.unwrap());

        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_values_expire_after_ttl() {
        let backend = MemoryBackend::new();
        backend.set("k", "v".to_string(), 5).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(backend.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!backend.exists("k").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_counters_start_at_zero() {
        let backend = MemoryBackend::new();

        assert_eq!(backend.increment("c").await.unwrap(), 1);
        assert_eq!(backend.increment("c").await.unwrap(), 2);
        assert_eq!(backend.decrement("c").await.unwrap(), 1);
        assert_eq!(backend.decrement("d").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let backend = MemoryBackend::new();
        backend.set("k", "\"text\"".to_string(), 60).await.unwrap();

        let err = backend.increment("k").await.unwrap_err();
        assert!(matches!(err, StateError::NotAnInteger(_)));
    }

    #[tokio::test]
    async fn test_list_push_head_pop_tail() {
        let backend = MemoryBackend::new();

        backend.list_push("q", "a".to_string()).await.unwrap();
        backend.list_push("q", "b".to_string()).await.unwrap();
        assert_eq!(backend.list_len("q").await.unwrap(), 2);

        assert_eq!(backend.list_pop("q").await.unwrap(), Some("a".to_string()));
        assert_eq!(backend.list_pop("q").await.unwrap(), Some("b".to_string()));
        assert_eq!(backend.list_pop("q").await.unwrap(), None);
        assert!(!backend.exists("q").await.unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch_reported() {
        let backend = MemoryBackend::new();
        backend.list_push("q", "a".to_string()).await.unwrap();

        assert!(matches!(
            backend.get("q").await.unwrap_err(),
            StateError::WrongType(_)
        ));
        assert!(matches!(
            backend.get_del("q").await.unwrap_err(),
            StateError::WrongType(_)
        ));

        backend.set("s", "1".to_string(), 60).await.unwrap();
        assert!(matches!(
            backend.list_push("s", "x".to_string()).await.unwrap_err(),
            StateError::WrongType(_)
        ));
    }

    #[tokio::test]
    async fn test_get_del_removes_value() {
        let backend = MemoryBackend::new();
        backend.set("k", "v".to_string(), 60).await.unwrap();

        assert_eq!(backend.get_del("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(backend.get_del("k").await.unwrap(), None);
        assert!(!backend.exists("k").await.unwrap());
    }
}
