// ABOUTME: Externally visible sandbox state mirrored into the shared state store
// ABOUTME: Stores one JSON document per sandbox under sandbox:{id}:state

use crate::store::StateStore;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone)]
pub struct SandboxStateCache {
    store: StateStore,
}

impl SandboxStateCache {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn key(sandbox_id: &str) -> String {
        format!("sandbox:{}:state", sandbox_id)
    }

    pub async fn set_state<T: Serialize + ?Sized>(
        &self,
        sandbox_id: &str,
        state: &T,
        ttl_secs: Option<u64>,
    ) -> bool {
        self.store
            .set(&Self::key(sandbox_id), state, ttl_secs)
            .await
    }

    pub async fn get_state<T: DeserializeOwned>(&self, sandbox_id: &str) -> Option<T> {
        self.store.get(&Self::key(sandbox_id)).await
    }

    pub async fn delete_state(&self, sandbox_id: &str) -> bool {
        self.store.delete(&Self::key(sandbox_id)).await
    }
}
