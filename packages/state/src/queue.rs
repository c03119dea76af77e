// ABOUTME: FIFO task queue layered on the state store
// ABOUTME: Payloads live under task:{queue}:{n}; ids are pushed on queue:{queue} and popped from the tail

use crate::error::Result;
use crate::store::StateStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct TaskQueue {
    store: StateStore,
}

impl TaskQueue {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    fn counter_key(queue_name: &str) -> String {
        format!("{}:counter", queue_name)
    }

    fn list_key(queue_name: &str) -> String {
        format!("queue:{}", queue_name)
    }

    /// Store `payload` and append its id to the queue, returning the task id.
    ///
    /// The payload is encoded before anything is written, so an unencodable
    /// payload leaves the queue and its counter untouched.
    pub async fn enqueue<T: Serialize + ?Sized>(
        &self,
        queue_name: &str,
        payload: &T,
        ttl_secs: Option<u64>,
    ) -> Result<String> {
        let serialized = serde_json::to_string(payload)?;

        let sequence = self
            .store
            .increment(&Self::counter_key(queue_name))
            .await?;
        let task_id = format!("task:{}:{}", queue_name, sequence);

        let backend = self.store.backend();
        backend
            .set(&task_id, serialized, self.store.effective_ttl(ttl_secs))
            .await?;
        backend
            .list_push(&Self::list_key(queue_name), task_id.clone())
            .await?;

        debug!(queue = queue_name, task_id = %task_id, "Enqueued task");
        Ok(task_id)
    }

    /// Pop the oldest task and return its payload.
    ///
    /// Returns `None` without side effects when the queue is empty. A popped id
    /// whose payload has already expired is consumed and also yields `None`.
    pub async fn dequeue<T: DeserializeOwned>(&self, queue_name: &str) -> Option<T> {
        let backend = self.store.backend();

        let task_id = match backend.list_pop(&Self::list_key(queue_name)).await {
            Ok(Some(task_id)) => task_id,
            Ok(None) => return None,
            Err(e) => {
                warn!(queue = queue_name, "Failed to pop task: {}", e);
                return None;
            }
        };

        let raw = match backend.get_del(&task_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!(queue = queue_name, task_id = %task_id, "Task payload expired before dequeue");
                return None;
            }
            Err(e) => {
                warn!(queue = queue_name, task_id = %task_id, "Failed to fetch task payload: {}", e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(payload) => {
                debug!(queue = queue_name, task_id = %task_id, "Dequeued task");
                Some(payload)
            }
            Err(e) => {
                warn!(queue = queue_name, task_id = %task_id, "Discarding undecodable task payload: {}", e);
                None
            }
        }
    }

    pub async fn length(&self, queue_name: &str) -> u64 {
        match self
            .store
            .backend()
            .list_len(&Self::list_key(queue_name))
            .await
        {
            Ok(len) => len,
            Err(e) => {
                warn!(queue = queue_name, "Failed to read queue length: {}", e);
                0
            }
        }
    }
}
