//! Docker Adapter
//!
//! Implementation of RuntimeAdapter for Docker using the bollard library.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::runtime::adapter::{
    ContainerInfo, ContainerSpec, ContainerStatus, RegistryAuth, RestartPolicy, RuntimeAdapter,
};

/// Docker runtime adapter
pub struct DockerAdapter {
    client: Docker,
}

impl DockerAdapter {
    /// Create a new Docker adapter connecting to the default socket
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_socket_defaults()
            .context("Failed to connect to Docker socket")?;

        Ok(Self { client })
    }

    /// Create a new Docker adapter with a custom socket path
    pub fn with_socket(socket_path: &str) -> Result<Self> {
        let client = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .context("Failed to connect to Docker socket")?;

        Ok(Self { client })
    }

    /// Convert bollard container state to our ContainerStatus
    fn parse_status(state: Option<&str>) -> ContainerStatus {
        match state {
            Some("created") => ContainerStatus::Created,
            Some("running") => ContainerStatus::Running,
            Some("paused") => ContainerStatus::Paused,
            Some("restarting") => ContainerStatus::Restarting,
            Some("exited") => ContainerStatus::Exited,
            Some("dead") => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

#[async_trait]
impl RuntimeAdapter for DockerAdapter {
    fn runtime_type(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(error = %e, "Docker ping failed");
                Ok(false)
            }
        }
    }

    async fn version(&self) -> Result<String> {
        let version = self.client.version().await?;
        Ok(format!(
            "Docker {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        ))
    }

    async fn find_container(
        &self,
        name: &str,
        include_stopped: bool,
    ) -> Result<Option<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let options = ListContainersOptions::<String> {
            all: include_stopped,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        // The name filter matches substrings, so require an exact match.
        let found = containers.into_iter().find(|container| {
            container
                .names
                .as_ref()
                .map(|names| names.iter().any(|n| n.trim_start_matches('/') == name))
                .unwrap_or(false)
        });

        Ok(found.map(|container| ContainerInfo {
            id: container.id.unwrap_or_default(),
            name: name.to_string(),
            image: container.image.unwrap_or_default(),
            status: Self::parse_status(container.state.as_deref()),
            labels: container.labels.unwrap_or_default(),
        }))
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (format!("{}/{}", p.container_port, p.protocol), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<bollard::service::PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                (
                    format!("{}/{}", p.container_port, p.protocol),
                    Some(vec![bollard::service::PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(p.host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let binds: Vec<String> = spec
            .volumes
            .iter()
            .map(|v| {
                if v.read_only {
                    format!("{}:{}:ro", v.source, v.target)
                } else {
                    format!("{}:{}", v.source, v.target)
                }
            })
            .collect();

        let host_config = bollard::service::HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            memory: spec.memory_limit_bytes,
            nano_cpus: spec.cpu_count.map(|c| (c * 1_000_000_000.0) as i64),
            restart_policy: spec.restart_policy.map(|p| bollard::service::RestartPolicy {
                name: Some(match p {
                    RestartPolicy::No => bollard::service::RestartPolicyNameEnum::NO,
                    RestartPolicy::Always => bollard::service::RestartPolicyNameEnum::ALWAYS,
                    RestartPolicy::OnFailure => bollard::service::RestartPolicyNameEnum::ON_FAILURE,
                    RestartPolicy::UnlessStopped => {
                        bollard::service::RestartPolicyNameEnum::UNLESS_STOPPED
                    }
                }),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let healthcheck = spec.health.map(|h| bollard::service::HealthConfig {
            test: Some(h.test),
            interval: Some(h.interval.as_nanos() as i64),
            timeout: Some(h.timeout.as_nanos() as i64),
            retries: Some(h.retries as i64),
            start_period: Some(h.start_period.as_nanos() as i64),
        });

        let config = Config {
            image: Some(spec.image),
            env: Some(env),
            labels: Some(spec.labels),
            exposed_ports: Some(exposed_ports),
            working_dir: spec.working_dir,
            healthcheck,
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: &spec.name,
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(create_options), config)
            .await?;
        info!(container_id = %response.id, name = %spec.name, "Container created");

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %id, "Container started");
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.client.stop_container(id, Some(options)).await?;
        info!(container_id = %id, "Container stopped");
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client.remove_container(id, Some(options)).await?;
        info!(container_id = %id, "Container removed");
        Ok(())
    }

    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let credentials = auth.map(|a| DockerCredentials {
            username: a.username.clone(),
            password: a.password.clone(),
            ..Default::default()
        });

        let mut stream = self.client.create_image(Some(options), None, credentials);

        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(image = %image, status = %status, "Pulling image");
                    }
                }
                Err(e) => {
                    return Err(e.into());
                }
            }
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(
            DockerAdapter::parse_status(Some("running")),
            ContainerStatus::Running
        );
        assert_eq!(
            DockerAdapter::parse_status(Some("exited")),
            ContainerStatus::Exited
        );
        assert_eq!(DockerAdapter::parse_status(None), ContainerStatus::Unknown);
    }
}
