// ABOUTME: Long-running orchestrator owning the sandbox pool, sweeper and thread synchronizer
// ABOUTME: Exposes the inbound create/stop/status surface and performs ordered shutdown

use crate::error::Result;
use replinet_config::Settings;
use replinet_sandbox::{
    ContainerRuntime, DockerRuntime, ResourceLimits, SandboxDescriptor, SandboxManager,
    SandboxManagerConfig, SweeperHandle, TimeoutSweeper,
};
use replinet_state::{KeyValueBackend, RedisBackend, SandboxStateCache, StateStore, TaskQueue};
use replinet_threads::{SqliteThreadStore, ThreadStore, ThreadSynchronizer};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sandbox template and limits derived from settings
pub fn manager_config(settings: &Settings) -> SandboxManagerConfig {
    SandboxManagerConfig {
        max_instances: settings.max_browser_instances,
        timeout: Duration::from_secs(settings.browser_timeout_secs),
        image: settings.browser_image.clone(),
        network: settings.browser_network.clone(),
        limits: ResourceLimits {
            memory_mb: settings.browser_memory_mb,
            cpu_quota: settings.browser_cpu_quota,
        },
    }
}

pub struct Orchestrator {
    settings: Settings,
    state: StateStore,
    queue: TaskQueue,
    sandboxes: Arc<SandboxManager>,
    synchronizer: Arc<ThreadSynchronizer>,
    sweeper: SweeperHandle,
    event_cancel: CancellationToken,
    event_loop: JoinHandle<()>,
}

impl Orchestrator {
    /// Connect to Redis, Docker and the thread database, then start background tasks
    pub async fn connect(settings: Settings) -> Result<Self> {
        let backend = RedisBackend::connect(&settings.redis_url).await?;

        let runtime = DockerRuntime::new()?;
        if !runtime.is_available().await {
            warn!("Docker daemon is not reachable; sandbox creation will fail until it is");
        }

        let store = SqliteThreadStore::connect(&settings.database_url).await?;

        Ok(Self::from_parts(
            settings,
            Arc::new(runtime),
            Arc::new(backend),
            Arc::new(store),
        ))
    }

    /// Wire already-constructed dependencies and start the sweeper and event loop.
    /// Must be called inside a Tokio runtime.
    pub fn from_parts(
        settings: Settings,
        runtime: Arc<dyn ContainerRuntime>,
        backend: Arc<dyn KeyValueBackend>,
        store: Arc<dyn ThreadStore>,
    ) -> Self {
        let state = StateStore::with_default_ttl(backend, settings.state_default_ttl_secs);
        let queue = TaskQueue::new(state.clone());

        let sandboxes = Arc::new(
            SandboxManager::new(runtime, manager_config(&settings))
                .with_state_cache(SandboxStateCache::new(state.clone())),
        );
        let synchronizer = Arc::new(ThreadSynchronizer::new(
            store,
            sandboxes.clone(),
            settings.max_threads_per_agent,
        ));

        let event_cancel = CancellationToken::new();
        let event_loop = synchronizer.spawn_event_loop(event_cancel.clone());
        let sweeper = TimeoutSweeper::spawn(
            sandboxes.clone(),
            Duration::from_secs(settings.sweep_interval_secs),
            CancellationToken::new(),
        );

        info!(
            max_instances = settings.max_browser_instances,
            timeout_secs = settings.browser_timeout_secs,
            image = %settings.browser_image,
            "Orchestrator started"
        );

        Self {
            settings,
            state,
            queue,
            sandboxes,
            synchronizer,
            sweeper,
            event_cancel,
            event_loop,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn task_queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn sandboxes(&self) -> &Arc<SandboxManager> {
        &self.sandboxes
    }

    pub fn synchronizer(&self) -> &Arc<ThreadSynchronizer> {
        &self.synchronizer
    }

    pub async fn create_sandbox(&self, agent_id: i64, thread_id: i64) -> Option<String> {
        self.sandboxes.create(agent_id, thread_id).await
    }

    pub async fn stop_sandbox(&self, sandbox_id: &str) -> bool {
        self.sandboxes.stop(sandbox_id).await
    }

    pub async fn sandbox_status(&self, sandbox_id: &str) -> Option<SandboxDescriptor> {
        self.sandboxes.status(sandbox_id).await
    }

    /// Stop the sweeper, release every sandbox, let the synchronizer record
    /// the stops, then drop connections. Returns how many sandboxes were stopped.
    pub async fn shutdown(self) -> usize {
        info!("Shutting down orchestrator");

        self.sweeper.shutdown().await;
        let stopped = self.sandboxes.cleanup_all().await;

        self.event_cancel.cancel();
        if let Err(e) = self.event_loop.await {
            error!("Thread synchronizer task failed: {}", e);
        }

        info!("Orchestrator stopped ({} sandboxes released)", stopped);
        stopped
    }
}
