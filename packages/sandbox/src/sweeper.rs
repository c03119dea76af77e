// ABOUTME: Background timeout sweeper reclaiming sandboxes that outlive their timeout
// ABOUTME: Periodically stops expired sandboxes until its cancellation token fires

use crate::manager::SandboxManager;
use crate::types::StopReason;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Periodic eviction of sandboxes older than the manager's timeout
pub struct TimeoutSweeper {
    manager: Arc<SandboxManager>,
    interval: Duration,
    cancel: CancellationToken,
}

impl TimeoutSweeper {
    pub fn new(manager: Arc<SandboxManager>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            manager,
            interval,
            cancel,
        }
    }

    /// Start the sweep loop on the runtime
    pub fn spawn(
        manager: Arc<SandboxManager>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> SweeperHandle {
        let sweeper = Self::new(manager, interval, cancel.clone());
        SweeperHandle {
            cancel,
            task: tokio::spawn(sweeper.run()),
        }
    }

    pub async fn run(self) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_secs = self.manager.config().timeout.as_secs(),
            "Timeout sweeper started"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; sweeping starts one interval in
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Timeout sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let stopped = sweep(&self.manager, Utc::now(), Some(&self.cancel)).await;
                    if stopped > 0 {
                        info!("Timeout sweeper reclaimed {} sandboxes", stopped);
                    }
                }
            }
        }
    }
}

/// Stop every sandbox expired at `now`, returning how many were released.
///
/// A failed stop leaves the sandbox registered; the next sweep retries it.
pub async fn sweep_once(manager: &SandboxManager, now: DateTime<Utc>) -> usize {
    sweep(manager, now, None).await
}

async fn sweep(
    manager: &SandboxManager,
    now: DateTime<Utc>,
    cancel: Option<&CancellationToken>,
) -> usize {
    let expired = manager.expired_ids(now);
    if expired.is_empty() {
        debug!("No expired sandboxes");
        return 0;
    }

    let mut stopped = 0;
    for sandbox_id in expired {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            debug!("Sweep interrupted by shutdown");
            break;
        }
        warn!(sandbox_id = %sandbox_id, "Sandbox exceeded its timeout, evicting");
        if manager
            .stop_with_reason(&sandbox_id, StopReason::Timeout)
            .await
        {
            stopped += 1;
        } else if manager.get(&sandbox_id).is_some() {
            error!("Failed to reclaim expired sandbox {}, will retry", sandbox_id);
        }
    }
    stopped
}

/// Running sweeper task
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Timeout sweeper task failed: {}", e);
        }
    }
}
