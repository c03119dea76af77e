// ABOUTME: Sandbox pool management for Replinet agents
// ABOUTME: Admission control, lifecycle tracking and timeout reclamation over a container runtime

pub mod error;
pub mod manager;
pub mod runtime;
pub mod sweeper;
pub mod types;

pub use error::{Result, SandboxError};
pub use manager::{SandboxManager, SandboxManagerConfig};
pub use runtime::{
    ContainerRuntime, DockerRuntime, InstanceHandle, InstanceSpec, ResourceLimits, RuntimeError,
};
pub use sweeper::{sweep_once, SweeperHandle, TimeoutSweeper, DEFAULT_SWEEP_INTERVAL};
pub use types::{Sandbox, SandboxDescriptor, SandboxEvent, StopReason};
