// ABOUTME: Container runtime capability consumed by the sandbox lifecycle manager
// ABOUTME: Defines instance specs, owned instance handles and the run/stop/status interface

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;

pub use docker::DockerRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Instance not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Resource ceiling applied to every sandbox instance
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    /// CFS quota in microseconds per 100ms period (100_000 = one CPU)
    pub cpu_quota: i64,
}

/// Everything the runtime needs to launch one isolated instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub image: String,
    pub name: String,
    pub env: HashMap<String, String>,
    pub limits: ResourceLimits,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Ownership of a live runtime instance.
///
/// Deliberately not `Clone`: the lifecycle manager's registry entry is the
/// only owner, so the resource can only be released through it.
#[derive(Debug, PartialEq, Eq)]
pub struct InstanceHandle {
    id: String,
}

impl InstanceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Container/VM backend able to run, stop and inspect sandbox instances
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a new instance
    async fn run_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle>;

    /// Stop a running instance and release its resources
    async fn stop_instance(&self, handle: &InstanceHandle) -> Result<()>;

    /// Runtime-reported state string (e.g. "running", "exited"). Inspection
    /// only needs the id; releasing the instance requires the owned handle.
    async fn instance_status(&self, instance_id: &str) -> Result<String>;
}
