// ABOUTME: Sandbox lifecycle manager enforcing the global instance cap
// ABOUTME: Owns the registry of live sandboxes and every runtime create/stop call

use crate::error::{Result, SandboxError};
use crate::runtime::{ContainerRuntime, InstanceHandle, InstanceSpec, ResourceLimits, RuntimeError};
use crate::types::{Sandbox, SandboxDescriptor, SandboxEvent, StopReason};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use replinet_state::SandboxStateCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const LABEL_PREFIX: &str = "replinet.sandbox";

/// Template and limits applied to every sandbox the manager creates
#[derive(Debug, Clone)]
pub struct SandboxManagerConfig {
    pub max_instances: usize,
    /// Maximum lifetime before the sweeper reclaims a sandbox
    pub timeout: Duration,
    pub image: String,
    pub network: Option<String>,
    pub limits: ResourceLimits,
}

impl Default for SandboxManagerConfig {
    fn default() -> Self {
        Self {
            max_instances: 10,
            timeout: Duration::from_secs(30),
            image: "browseruse/browser-use:latest".to_string(),
            network: Some("replinet_network".to_string()),
            limits: ResourceLimits {
                memory_mb: 1024,
                cpu_quota: 100_000,
            },
        }
    }
}

struct RegistryEntry {
    sandbox: Sandbox,
    /// `None` while a stop is in flight; the stop claim holds the handle
    handle: Option<InstanceHandle>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, RegistryEntry>,
    /// Admitted creates whose runtime call has not finished yet
    pending: usize,
}

impl Registry {
    fn occupied(&self) -> usize {
        self.entries.len() + self.pending
    }
}

/// A capacity slot held between admission and registration.
///
/// Dropping it without committing (runtime failure or a cancelled create)
/// gives the slot back.
struct SlotReservation<'a> {
    registry: &'a Mutex<Registry>,
    armed: bool,
}

impl SlotReservation<'_> {
    fn commit(mut self, sandbox: Sandbox, handle: InstanceHandle) {
        let mut registry = self.registry.lock();
        registry.pending -= 1;
        registry.entries.insert(
            sandbox.id.clone(),
            RegistryEntry {
                sandbox,
                handle: Some(handle),
            },
        );
        self.armed = false;
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.lock().pending -= 1;
        }
    }
}

/// Exclusive right to release one registered sandbox.
///
/// Dropping the claim without calling [`StopClaim::release`] puts the handle
/// back so the sandbox stays tracked and can be stopped again.
struct StopClaim<'a> {
    registry: &'a Mutex<Registry>,
    sandbox_id: String,
    handle: Option<InstanceHandle>,
}

impl StopClaim<'_> {
    fn handle(&self) -> Option<&InstanceHandle> {
        self.handle.as_ref()
    }

    fn release(mut self) -> Option<Sandbox> {
        // The instance is gone; the handle dies with the registry entry
        self.handle.take();
        self.registry
            .lock()
            .entries
            .remove(&self.sandbox_id)
            .map(|entry| entry.sandbox)
    }
}

impl Drop for StopClaim<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Some(entry) = self.registry.lock().entries.get_mut(&self.sandbox_id) {
                entry.handle = Some(handle);
            }
        }
    }
}

/// Sandbox lifecycle manager
pub struct SandboxManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxManagerConfig,
    registry: Mutex<Registry>,
    events: broadcast::Sender<SandboxEvent>,
    state_cache: Option<SandboxStateCache>,
}

impl SandboxManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            runtime,
            config,
            registry: Mutex::new(Registry::default()),
            events,
            state_cache: None,
        }
    }

    /// Mirror sandbox descriptors into the shared state store
    pub fn with_state_cache(mut self, cache: SandboxStateCache) -> Self {
        self.state_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &SandboxManagerConfig {
        &self.config
    }

    /// Subscribe to created/stopped events
    pub fn subscribe(&self) -> broadcast::Receiver<SandboxEvent> {
        self.events.subscribe()
    }

    /// Create a sandbox, returning its id or `None` when at capacity or the
    /// runtime refuses
    pub async fn create(&self, agent_id: i64, thread_id: i64) -> Option<String> {
        match self.try_create(agent_id, thread_id).await {
            Ok(id) => Some(id),
            Err(SandboxError::CapacityExceeded { active, max }) => {
                warn!(
                    "Sandbox capacity reached ({}/{}), rejecting agent {} thread {}",
                    active, max, agent_id, thread_id
                );
                None
            }
            Err(e) => {
                error!(
                    "Failed to create sandbox for agent {} thread {}: {}",
                    agent_id, thread_id, e
                );
                None
            }
        }
    }

    /// Create a sandbox, reporting why admission or creation failed
    pub async fn try_create(&self, agent_id: i64, thread_id: i64) -> Result<String> {
        let reservation = self.reserve_slot()?;

        let spec = self.instance_spec(agent_id, thread_id);
        debug!("Creating sandbox instance {}", spec.name);

        let handle = self
            .runtime
            .run_instance(&spec)
            .await
            .map_err(SandboxError::RuntimeCreateFailure)?;

        let sandbox = Sandbox {
            id: handle.id().to_string(),
            agent_id,
            thread_id,
            started_at: Utc::now(),
        };
        reservation.commit(sandbox.clone(), handle);

        info!(
            sandbox_id = %sandbox.id,
            agent_id,
            thread_id,
            "Sandbox created"
        );

        self.mirror_state(&sandbox, "running").await;
        self.publish(SandboxEvent::Created(sandbox.clone()));
        Ok(sandbox.id)
    }

    fn reserve_slot(&self) -> Result<SlotReservation<'_>> {
        let mut registry = self.registry.lock();
        let active = registry.occupied();
        if active >= self.config.max_instances {
            return Err(SandboxError::CapacityExceeded {
                active,
                max: self.config.max_instances,
            });
        }
        registry.pending += 1;

        Ok(SlotReservation {
            registry: &self.registry,
            armed: true,
        })
    }

    fn instance_spec(&self, agent_id: i64, thread_id: i64) -> InstanceSpec {
        let name = format!(
            "browser_{}_{}_{}",
            agent_id,
            thread_id,
            Utc::now().timestamp_millis()
        );

        let mut env = HashMap::new();
        env.insert("AGENT_ID".to_string(), agent_id.to_string());
        env.insert("THREAD_ID".to_string(), thread_id.to_string());

        let mut labels = HashMap::new();
        labels.insert(format!("{}.agent_id", LABEL_PREFIX), agent_id.to_string());
        labels.insert(format!("{}.thread_id", LABEL_PREFIX), thread_id.to_string());

        InstanceSpec {
            image: self.config.image.clone(),
            name,
            env,
            limits: self.config.limits.clone(),
            network: self.config.network.clone(),
            labels,
        }
    }

    /// Stop a sandbox at the caller's request
    pub async fn stop(&self, sandbox_id: &str) -> bool {
        self.stop_with_reason(sandbox_id, StopReason::Requested)
            .await
    }

    /// Stop a sandbox, returning false when it is unknown, already being
    /// stopped, or the runtime failed to stop it
    pub async fn stop_with_reason(&self, sandbox_id: &str, reason: StopReason) -> bool {
        match self.try_stop(sandbox_id, reason).await {
            Ok(_) => true,
            Err(SandboxError::NotFound(_)) | Err(SandboxError::AlreadyStopping(_)) => {
                debug!("Sandbox {} is not stoppable", sandbox_id);
                false
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    /// Stop a sandbox and return its final record
    pub async fn try_stop(&self, sandbox_id: &str, reason: StopReason) -> Result<Sandbox> {
        let claim = self.claim(sandbox_id)?;
        let Some(handle) = claim.handle() else {
            return Err(SandboxError::AlreadyStopping(sandbox_id.to_string()));
        };

        match self.runtime.stop_instance(handle).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                warn!(
                    "Sandbox {} was already gone from the runtime, releasing its slot",
                    sandbox_id
                );
            }
            Err(source) => {
                // Dropping the claim keeps the entry registered
                return Err(SandboxError::RuntimeStopFailure {
                    id: sandbox_id.to_string(),
                    source,
                });
            }
        }

        let sandbox = claim
            .release()
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;

        info!(
            sandbox_id = %sandbox.id,
            agent_id = sandbox.agent_id,
            thread_id = sandbox.thread_id,
            reason = reason.as_str(),
            "Sandbox stopped"
        );

        self.forget_state(&sandbox.id).await;
        self.publish(SandboxEvent::Stopped {
            sandbox: sandbox.clone(),
            reason,
        });
        Ok(sandbox)
    }

    fn claim(&self, sandbox_id: &str) -> Result<StopClaim<'_>> {
        let mut registry = self.registry.lock();
        let entry = registry
            .entries
            .get_mut(sandbox_id)
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
        let handle = entry
            .handle
            .take()
            .ok_or_else(|| SandboxError::AlreadyStopping(sandbox_id.to_string()))?;

        Ok(StopClaim {
            registry: &self.registry,
            sandbox_id: sandbox_id.to_string(),
            handle: Some(handle),
        })
    }

    /// Describe a tracked sandbox; the runtime state is "unknown" when it
    /// cannot be queried
    pub async fn status(&self, sandbox_id: &str) -> Option<SandboxDescriptor> {
        let sandbox = self.get(sandbox_id)?;

        let status = match self.runtime.instance_status(&sandbox.id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to query status of sandbox {}: {}", sandbox.id, e);
                "unknown".to_string()
            }
        };

        Some(SandboxDescriptor {
            sandbox_id: sandbox.id,
            status,
            agent_id: sandbox.agent_id,
            thread_id: sandbox.thread_id,
            started_at: sandbox.started_at,
        })
    }

    pub fn get(&self, sandbox_id: &str) -> Option<Sandbox> {
        self.registry
            .lock()
            .entries
            .get(sandbox_id)
            .map(|entry| entry.sandbox.clone())
    }

    pub fn list(&self) -> Vec<Sandbox> {
        let mut sandboxes: Vec<Sandbox> = self
            .registry
            .lock()
            .entries
            .values()
            .map(|entry| entry.sandbox.clone())
            .collect();
        sandboxes.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sandboxes
    }

    /// Number of registered sandboxes, including ones mid-stop
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of sandboxes older than the configured timeout at `now` that are
    /// not already being stopped
    pub fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.registry
            .lock()
            .entries
            .values()
            .filter(|entry| entry.handle.is_some())
            .filter(|entry| entry.sandbox.is_expired(now, self.config.timeout))
            .map(|entry| entry.sandbox.id.clone())
            .collect()
    }

    /// Stop every tracked sandbox, returning how many were released
    pub async fn cleanup_all(&self) -> usize {
        let ids: Vec<String> = self.registry.lock().entries.keys().cloned().collect();
        let total = ids.len();

        let mut stopped = 0;
        for id in ids {
            if self.stop_with_reason(&id, StopReason::Shutdown).await {
                stopped += 1;
            }
        }

        if stopped < total {
            warn!(
                "Sandbox cleanup incomplete: stopped {} of {} sandboxes",
                stopped, total
            );
        } else {
            info!("Sandbox cleanup complete: stopped {} sandboxes", stopped);
        }
        stopped
    }

    fn publish(&self, event: SandboxEvent) {
        // No subscribers is a normal state
        let _ = self.events.send(event);
    }

    async fn mirror_state(&self, sandbox: &Sandbox, status: &str) {
        let Some(cache) = &self.state_cache else {
            return;
        };
        let descriptor = SandboxDescriptor {
            sandbox_id: sandbox.id.clone(),
            status: status.to_string(),
            agent_id: sandbox.agent_id,
            thread_id: sandbox.thread_id,
            started_at: sandbox.started_at,
        };
        if !cache.set_state(&sandbox.id, &descriptor, None).await {
            debug!("Sandbox state for {} was not cached", sandbox.id);
        }
    }

    async fn forget_state(&self, sandbox_id: &str) {
        if let Some(cache) = &self.state_cache {
            cache.delete_state(sandbox_id).await;
        }
    }
}
