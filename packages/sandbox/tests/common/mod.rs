// ABOUTME: In-process container runtime double shared by sandbox integration tests
// ABOUTME: Counts runtime calls, tracks live instances and can block or fail stops on demand

#![allow(dead_code)]

use async_trait::async_trait;
use replinet_sandbox::runtime::Result as RuntimeResult;
use replinet_sandbox::{
    ContainerRuntime, InstanceHandle, InstanceSpec, RuntimeError, SandboxManager,
    SandboxManagerConfig,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Default)]
pub struct FakeRuntime {
    next_id: AtomicUsize,
    pub run_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    live: Mutex<HashSet<String>>,
    specs: Mutex<Vec<InstanceSpec>>,
    fail_stops: AtomicBool,
    create_delay: Option<Duration>,
    stop_gate: Option<Arc<Semaphore>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every create takes `delay`, so concurrent creates overlap
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Stops block until a permit is added to `gate`
    pub fn with_stop_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            stop_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn fail_stops(&self, fail: bool) {
        self.fail_stops.store(fail, Ordering::SeqCst);
    }

    pub fn live_instances(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.lock().unwrap().contains(id)
    }

    pub fn specs(&self) -> Vec<InstanceSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn runs(&self) -> usize {
        self.run_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run_instance(&self, spec: &InstanceSpec) -> RuntimeResult<InstanceHandle> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().unwrap().insert(id.clone());
        self.specs.lock().unwrap().push(spec.clone());
        Ok(InstanceHandle::new(id))
    }

    async fn stop_instance(&self, handle: &InstanceHandle) -> RuntimeResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.stop_gate {
            gate.acquire()
                .await
                .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?
                .forget();
        }

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

pub fn manager_with(
    runtime: Arc<FakeRuntime>,
    max_instances: usize,
    timeout: Duration,
) -> Arc<SandboxManager> {
    let config = SandboxManagerConfig {
        max_instances,
        timeout,
        ..Default::default()
    };
    Arc::new(SandboxManager::new(runtime, config))
}
