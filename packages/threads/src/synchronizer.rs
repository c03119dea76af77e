// ABOUTME: Keeps persisted thread and agent state in step with sandbox lifecycle events
// ABOUTME: Starts, stops and completes threads through the sandbox manager and the thread store

use crate::error::{StorageError, SyncError};
use crate::models::{Thread, ThreadCompletion, ThreadStatus};
use crate::storage::ThreadStore;
use chrono::Utc;
use parking_lot::Mutex;
use replinet_sandbox::{SandboxEvent, SandboxManager};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type Result<T> = std::result::Result<T, SyncError>;

pub const DEFAULT_MAX_THREADS_PER_AGENT: usize = 5;

/// Bridge between the sandbox pool and persisted thread state
pub struct ThreadSynchronizer {
    store: Arc<dyn ThreadStore>,
    sandboxes: Arc<SandboxManager>,
    max_threads_per_agent: usize,
    agent_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadSynchronizer {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        sandboxes: Arc<SandboxManager>,
        max_threads_per_agent: usize,
    ) -> Self {
        Self {
            store,
            sandboxes,
            max_threads_per_agent,
            agent_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    /// Serializes admission checks per agent
    fn agent_lock(&self, agent_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.agent_locks
            .lock()
            .entry(agent_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Give a `created` thread a sandbox and mark it running
    pub async fn start_thread(&self, thread_id: i64) -> Result<Thread> {
        let agent_id = self.store.get_thread(thread_id).await?.agent_id;
        let lock = self.agent_lock(agent_id);
        let _admission = lock.lock().await;

        // Checked under the lock so a concurrent start of the same thread sees `running`
        let thread = self.store.get_thread(thread_id).await?;
        if thread.status != ThreadStatus::Created {
            return Err(SyncError::InvalidState {
                thread_id,
                status: thread.status,
                expected: "created",
            });
        }

        let running = self.store.count_running_threads(agent_id).await?;
        if running >= self.max_threads_per_agent as i64 {
            return Err(SyncError::ThreadLimitReached {
                agent_id,
                limit: self.max_threads_per_agent,
            });
        }

        let sandbox_id = self
            .sandboxes
            .create(agent_id, thread_id)
            .await
            .ok_or(SyncError::SandboxUnavailable(thread_id))?;

        let thread = match self
            .store
            .mark_running(thread_id, &sandbox_id, Utc::now())
            .await
        {
            Ok(thread) => thread,
            Err(e) => {
                error!(
                    "Failed to record sandbox {} for thread {}: {}",
                    sandbox_id, thread_id, e
                );
                if !self.sandboxes.stop(&sandbox_id).await {
                    warn!("Sandbox {} could not be rolled back", sandbox_id);
                }
                return Err(e.into());
            }
        };

        // The sandbox may have been evicted before the row said running
        if self.sandboxes.get(&sandbox_id).is_none() {
            warn!(
                "Sandbox {} for thread {} vanished during start",
                sandbox_id, thread_id
            );
            self.store
                .mark_stopped_if_running(thread_id, &sandbox_id)
                .await?;
            return Ok(self.store.get_thread(thread_id).await?);
        }

        info!(thread_id, agent_id, sandbox_id = %sandbox_id, "Thread running");
        Ok(thread)
    }

    /// Stop the sandbox serving a thread and mark the thread stopped
    pub async fn stop_thread(&self, thread_id: i64) -> Result<Thread> {
        let thread = self.store.get_thread(thread_id).await?;
        let Some(sandbox_id) = thread.browser_id else {
            return Err(SyncError::NoSandbox { thread_id });
        };

        if !self.sandboxes.stop(&sandbox_id).await && self.sandboxes.get(&sandbox_id).is_some() {
            return Err(SyncError::StopFailed {
                thread_id,
                sandbox_id,
            });
        }

        self.store
            .mark_stopped_if_running(thread_id, &sandbox_id)
            .await?;
        info!(thread_id, sandbox_id = %sandbox_id, "Thread stopped");

        Ok(self.store.get_thread(thread_id).await?)
    }

    /// Record the outcome of a finished thread and roll it into the agent's statistics
    pub async fn complete_thread(
        &self,
        thread_id: i64,
        success: bool,
        error_message: Option<String>,
        results: Option<JsonValue>,
    ) -> Result<Thread> {
        let thread = self.store.get_thread(thread_id).await?;
        if thread.status.is_finished() {
            return Err(SyncError::InvalidState {
                thread_id,
                status: thread.status,
                expected: "unfinished",
            });
        }

        if let Some(sandbox_id) = &thread.browser_id {
            if !self.sandboxes.stop(sandbox_id).await && self.sandboxes.get(sandbox_id).is_some() {
                warn!(
                    "Sandbox {} of completed thread {} is still running",
                    sandbox_id, thread_id
                );
            }
        }

        let completion = ThreadCompletion::new(&thread, success, error_message, results, Utc::now());
        let finished = match self.store.complete(thread_id, &completion).await {
            Ok(finished) => finished,
            // Another completion won the race
            Err(StorageError::Conflict(_)) => {
                let current = self.store.get_thread(thread_id).await?;
                return Err(SyncError::InvalidState {
                    thread_id,
                    status: current.status,
                    expected: "unfinished",
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            thread_id,
            agent_id = thread.agent_id,
            status = %finished.status,
            execution_time = ?finished.execution_time,
            "Thread finished"
        );
        Ok(finished)
    }

    /// Apply one sandbox lifecycle event to thread state
    pub async fn handle_event(&self, event: &SandboxEvent) -> Result<()> {
        match event {
            SandboxEvent::Created(sandbox) => {
                debug!(
                    "Sandbox {} created for thread {}",
                    sandbox.id, sandbox.thread_id
                );
            }
            SandboxEvent::Stopped { sandbox, reason } => {
                let changed = self
                    .store
                    .mark_stopped_if_running(sandbox.thread_id, &sandbox.id)
                    .await?;
                if changed {
                    info!(
                        thread_id = sandbox.thread_id,
                        sandbox_id = %sandbox.id,
                        reason = reason.as_str(),
                        "Thread stopped with its sandbox"
                    );
                }
            }
        }
        Ok(())
    }

    /// Consume sandbox events until cancelled or the channel closes. Events
    /// queued at cancellation are still applied before returning.
    pub async fn run_event_loop(
        &self,
        mut events: broadcast::Receiver<SandboxEvent>,
        cancel: CancellationToken,
    ) {
        info!("Thread synchronizer started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.drain(&mut events).await;
                    info!("Thread synchronizer shutting down");
                    break;
                }
                received = events.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(&event).await {
                            error!("Failed to apply sandbox event: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => self.recover_lag(skipped).await,
                    Err(RecvError::Closed) => {
                        info!("Sandbox event channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Apply events already queued, e.g. the stops issued by a shutdown cleanup
    async fn drain(&self, events: &mut broadcast::Receiver<SandboxEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => {
                    if let Err(e) = self.handle_event(&event).await {
                        error!("Failed to apply sandbox event: {}", e);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => self.recover_lag(skipped).await,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    async fn recover_lag(&self, skipped: u64) {
        warn!("Thread synchronizer lagged, skipped {} sandbox events", skipped);
        if let Err(e) = self.reconcile().await {
            error!("Failed to reconcile threads after lag: {}", e);
        }
    }

    /// Mark stopped every `running` thread whose sandbox is no longer
    /// registered. Sandboxes leave the registry before their `Stopped` event
    /// is published, so this recovers any stop a lagging receiver skipped.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut reconciled = 0;
        for thread in self.store.running_threads().await? {
            let Some(sandbox_id) = thread.browser_id else {
                continue;
            };
            if self.sandboxes.get(&sandbox_id).is_none()
                && self
                    .store
                    .mark_stopped_if_running(thread.id, &sandbox_id)
                    .await?
            {
                reconciled += 1;
            }
        }

        if reconciled > 0 {
            info!(reconciled, "Reconciled threads whose sandboxes were released");
        }
        Ok(reconciled)
    }

    /// Subscribe to the sandbox manager and run the event loop on its own task
    pub fn spawn_event_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let events = self.sandboxes.subscribe();
        let synchronizer = Arc::clone(self);
        tokio::spawn(async move { synchronizer.run_event_loop(events, cancel).await })
    }

    /// Stop every sandbox held by the agent's threads, then delete the agent
    pub async fn delete_agent(&self, agent_id: i64) -> Result<usize> {
        self.store.get_agent(agent_id).await?;

        let mut stopped = 0;
        for thread in self.store.threads_for_agent(agent_id).await? {
            let Some(sandbox_id) = thread.browser_id else {
                continue;
            };
            if self.sandboxes.stop(&sandbox_id).await {
                stopped += 1;
            } else if self.sandboxes.get(&sandbox_id).is_some() {
                warn!(
                    "Sandbox {} of deleted agent {} could not be stopped",
                    sandbox_id, agent_id
                );
            }
        }

        self.store.delete_agent(agent_id).await?;
        self.agent_locks.lock().remove(&agent_id);
        info!(agent_id, stopped, "Agent deleted");
        Ok(stopped)
    }
}
