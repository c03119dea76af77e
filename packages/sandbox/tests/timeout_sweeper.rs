// ABOUTME: Integration tests for the background timeout sweeper
// ABOUTME: Covers expiry selection, retry after failed stops and cancellation of the loop

mod common;

use chrono::Utc;
use common::{manager_with, FakeRuntime};
use pretty_assertions::assert_eq;
use replinet_sandbox::{sweep_once, SandboxEvent, StopReason, TimeoutSweeper};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_sweep_stops_only_expired_sandboxes() {
    let runtime = Arc::new(FakeRuntime::new());
    let manager = manager_with(runtime.clone(), 3, Duration::from_secs(30));
    let id = manager.create(1, 1).await.unwrap();

    assert_eq!(sweep_once(&manager, Utc::now()).await, 0);
    assert_eq!(manager.len(), 1);

    let later = Utc::now() + chrono::Duration::seconds(31);
    assert_eq!(manager.expired_ids(later), vec![id.clone()]);
    assert_eq!(sweep_once(&manager, later).await, 1);
    assert!(manager.is_empty());
    assert!(!runtime.is_live(&id));
}

#[tokio::test]
async fn test_sweep_retries_after_failed_stop() {
    let runtime = Arc::new(FakeRuntime::new());
    let manager = manager_with(runtime.clone(), 1, Duration::from_secs(1));
    manager.create(1, 1).await.unwrap();
    let later = Utc::now() + chrono::Duration::seconds(5);

    runtime.fail_stops(true);
    assert_eq!(sweep_once(&manager, later).await, 0);
    assert_eq!(manager.len(), 1);

    runtime.fail_stops(false);
    assert_eq!(sweep_once(&manager, later).await, 1);
    assert!(manager.is_empty());
}

/// Test the end-to-end reclamation scenario with a single-slot pool
///
/// This test verifies:
/// 1. The pool refuses a second sandbox while the first is alive
/// 2. The sweeper reclaims the first sandbox once it times out
/// 3. The freed slot admits a new sandbox
#[tokio::test]
async fn test_sweeper_reclaims_slot_for_new_sandbox() {
    let runtime = Arc::new(FakeRuntime::new());
    let manager = manager_with(runtime.clone(), 1, Duration::from_millis(100));
    let mut events = manager.subscribe();

    let first = manager.create(1, 1).await.unwrap();
    assert!(manager.create(1, 2).await.is_none());

    let sweeper = TimeoutSweeper::spawn(
        manager.clone(),
        Duration::from_millis(50),
        CancellationToken::new(),
    );

    let evicted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SandboxEvent::Stopped { sandbox, reason }) = events.recv().await {
                return (sandbox.id, reason);
            }
        }
    })
    .await
    .expect("sweeper should evict the expired sandbox");
    assert_eq!(evicted, (first.clone(), StopReason::Timeout));

    let second = manager.create(1, 2).await;
    assert!(second.is_some());
    assert_ne!(second.unwrap(), first);

    sweeper.shutdown().await;
}

#[tokio::test]
async fn test_sweeper_exits_on_cancellation() {
    let runtime = Arc::new(FakeRuntime::new());
    let manager = manager_with(runtime, 1, Duration::from_secs(30));
    let cancel = CancellationToken::new();

    let sweeper = TimeoutSweeper::spawn(manager, Duration::from_millis(10), cancel.clone());
    assert!(!sweeper.is_finished());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
        .await
        .expect("sweeper should stop promptly after cancellation");
}

/// Test that a sweep in progress stops evicting once cancelled
#[tokio::test]
async fn test_cancellation_interrupts_running_sweep() {
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let runtime = Arc::new(FakeRuntime::with_stop_gate(gate.clone()));
    let manager = manager_with(runtime.clone(), 3, Duration::from_millis(20));
    for thread_id in 0..3 {
        manager.create(1, thread_id).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cancel = CancellationToken::new();
    let sweeper = TimeoutSweeper::spawn(manager.clone(), Duration::from_millis(10), cancel.clone());

    // The first eviction is parked inside the runtime
    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime.stops() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("sweeper should start evicting");

    cancel.cancel();
    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
        .await
        .expect("sweeper should exit after the eviction in flight");

    assert_eq!(runtime.stops(), 1);
    assert_eq!(manager.len(), 2);
    assert_eq!(runtime.live_instances(), 2);
}
