// ABOUTME: Shared fixtures for synchronizer integration tests
// ABOUTME: Provides an in-process runtime double and a wired synchronizer over in-memory SQLite

#![allow(dead_code)]

use async_trait::async_trait;
use replinet_sandbox::runtime::Result as RuntimeResult;
use replinet_sandbox::{
    ContainerRuntime, InstanceHandle, InstanceSpec, RuntimeError, SandboxManager,
    SandboxManagerConfig,
};
use replinet_threads::{Agent, NewAgent, SqliteThreadStore, ThreadStore, ThreadSynchronizer};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct FakeRuntime {
    next_id: AtomicUsize,
    live: Mutex<HashSet<String>>,
    fail_stops: AtomicBool,
}

impl FakeRuntime {
    pub fn fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.lock().unwrap().contains(id)
    }

    pub fn live_instances(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run_instance(&self, _spec: &InstanceSpec) -> RuntimeResult<InstanceHandle> {
        let id = format!("browser-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().unwrap().insert(id.clone());
        Ok(InstanceHandle::new(id))
    }

    async fn stop_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()> {
        if self.fail_stops.load(Ordering::SeqCst) {
            return Err(RuntimeError::ContainerError("injected stop failure".to_string()));
        }
        if self.live.lock().unwrap().remove(handle.id()) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(handle.id().to_string()))
        }
    }

    async fn instance_status(&self, instance_id: &str) -> RuntimeResult<String> {
        if self.is_live(instance_id) {
            Ok("running".to_string())
        } else {
            Err(RuntimeError::NotFound(instance_id.to_string()))
        }
    }
}

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub manager: Arc<SandboxManager>,
    pub store: Arc<SqliteThreadStore>,
    pub sync: Arc<ThreadSynchronizer>,
}

impl Harness {
    pub async fn new(max_instances: usize, timeout: Duration, max_threads_per_agent: usize) -> Self {
        let runtime = Arc::new(FakeRuntime::default());
        let manager = Arc::new(SandboxManager::new(
            runtime.clone(),
            SandboxManagerConfig {
                max_instances,
                timeout,
                ..Default::default()
            },
        ));
        let store = Arc::new(
            SqliteThreadStore::in_memory()
                .await
                .expect("Failed to create in-memory store"),
        );
        let sync = Arc::new(ThreadSynchronizer::new(
            store.clone(),
            manager.clone(),
            max_threads_per_agent,
        ));

        Self {
            runtime,
            manager,
            store,
            sync,
        }
    }

    pub async fn agent(&self, name: &str) -> Agent {
        self.store
            .create_agent(NewAgent {
                user_id: 1,
                preset_id: 1,
                name: name.to_string(),
                description: None,
            })
            .await
            .unwrap()
    }
}
