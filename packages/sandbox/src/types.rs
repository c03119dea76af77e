// ABOUTME: Sandbox records, status descriptors and lifecycle events
// ABOUTME: Shared by the lifecycle manager, the timeout sweeper and event consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A live sandbox as tracked by the lifecycle manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    /// Runtime-assigned instance id
    pub id: String,
    pub agent_id: i64,
    pub thread_id: i64,
    pub started_at: DateTime<Utc>,
}

impl Sandbox {
    /// True when the sandbox has been alive strictly longer than `timeout`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let age = now.signed_duration_since(self.started_at);
        match chrono::Duration::from_std(timeout) {
            Ok(limit) => age > limit,
            // A timeout too large to represent never elapses
            Err(_) => false,
        }
    }
}

/// Read-only status snapshot of a sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxDescriptor {
    pub sandbox_id: String,
    /// State reported by the container runtime, "unknown" when it cannot be queried
    pub status: String,
    pub agent_id: i64,
    pub thread_id: i64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop request from an API caller or cascade
    Requested,
    /// Evicted by the timeout sweeper
    Timeout,
    /// Stopped during service shutdown
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Requested => "requested",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    Created(Sandbox),
    Stopped { sandbox: Sandbox, reason: StopReason },
}
