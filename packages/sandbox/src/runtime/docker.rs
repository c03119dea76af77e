// ABOUTME: Docker runtime implementation for local container-based sandboxes
// ABOUTME: Uses bollard to launch resource-limited, auto-removed browser containers

use super::{ContainerRuntime, InstanceHandle, InstanceSpec, Result, RuntimeError};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    image::CreateImageOptions,
    Docker,
};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Period the CPU quota is measured against (100ms)
const CPU_PERIOD_MICROS: i64 = 100_000;

/// Memory limit in bytes as Docker expects it
fn memory_bytes(memory_mb: u64) -> Result<i64> {
    memory_mb
        .checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .ok_or_else(|| {
            RuntimeError::ContainerError(format!("memory limit of {} MB is too large", memory_mb))
        })
}

/// Grace period given to a container before it is killed on stop
const STOP_GRACE_SECS: i64 = 10;

pub struct DockerRuntime {
    client: Docker,
    label_prefix: String,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon with the default pull timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client_and_timeout(client, timeout))
    }

    /// Create with a specific Docker connection and custom timeout
    pub fn with_client_and_timeout(client: Docker, timeout: Duration) -> Self {
        Self {
            client,
            label_prefix: "replinet.sandbox".to_string(),
            pull_timeout: timeout,
        }
    }

    /// Check that the daemon answers
    pub async fn is_available(&self) -> bool {
        match self.client.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Docker not available: {}", e);
                false
            }
        }
    }

    /// Convert an instance spec to a bollard container config
    fn to_bollard_config(&self, spec: &InstanceSpec) -> Result<Config<String>> {
        let mut labels = spec.labels.clone();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());
        labels.insert(format!("{}.name", self.label_prefix), spec.name.clone());

        let mut env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();

        let host_config = bollard::models::HostConfig {
            memory: Some(memory_bytes(spec.limits.memory_mb)?),
            cpu_quota: Some(spec.limits.cpu_quota),
            cpu_period: Some(CPU_PERIOD_MICROS),
            network_mode: spec.network.clone(),
            auto_remove: Some(true),
            ..Default::default()
        };

        Ok(Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(RuntimeError::ImageError(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(RuntimeError::ImageError(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(RuntimeError::ImageError(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(RuntimeError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    fn map_container_error(container_id: &str, err: bollard::errors::Error) -> RuntimeError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => RuntimeError::NotFound(container_id.to_string()),
            other => RuntimeError::ContainerError(other.to_string()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run_instance(&self, spec: &InstanceSpec) -> Result<InstanceHandle> {
        info!("Creating container: {}", spec.name);

        if !self.image_exists(&spec.image).await? {
            self.pull_image(&spec.image).await?;
        }

        let config = self.to_bollard_config(spec)?;
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::ContainerError(e.to_string()))?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            // A created-but-unstarted container is not auto-removed, so clean it up here
            let remove = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(remove_err) = self
                .client
                .remove_container(&container.id, Some(remove))
                .await
            {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    container.id, remove_err
                );
            }
            return Err(RuntimeError::ContainerError(e.to_string()));
        }

        Ok(InstanceHandle::new(container.id))
    }

    async fn stop_instance(&self, handle: &InstanceHandle) -> Result<()> {
        info!(
            "Stopping container: {} (grace: {}s)",
            handle.id(),
            STOP_GRACE_SECS
        );

        let options = StopContainerOptions { t: STOP_GRACE_SECS };

        match self.client.stop_container(handle.id(), Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(Self::map_container_error(handle.id(), e)),
        }
    }

    async fn instance_status(&self, instance_id: &str) -> Result<String> {
        let inspect = self
            .client
            .inspect_container(instance_id, None)
            .await
            .map_err(|e| Self::map_container_error(instance_id, e))?;

        let status: &str = inspect
            .state
            .as_ref()
            .and_then(|state| state.status.as_ref())
            .map(|s| s.as_ref())
            .unwrap_or("unknown");

        Ok(status.to_string())
    }
}
