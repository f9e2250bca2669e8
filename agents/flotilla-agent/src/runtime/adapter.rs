//! Runtime Adapter Trait
//!
//! Defines the common interface for container runtime adapters.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Container information returned by the runtime
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
}

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Restarting => write!(f, "restarting"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Dead => write!(f, "dead"),
            ContainerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Registry credentials used for image pulls
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Port publication from container to host
#[derive(Debug, Clone)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

/// Bind mount from a host path into the container
#[derive(Debug, Clone)]
pub struct VolumeBinding {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Container restart policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

/// Health probe executed by the runtime inside the container
#[derive(Debug, Clone)]
pub struct HealthProbe {
    /// Probe command in the runtime's test format, e.g. `["CMD-SHELL", ...]`.
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

/// Full container specification for creation
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<VolumeBinding>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub memory_limit_bytes: Option<i64>,
    pub cpu_count: Option<f64>,
    pub restart_policy: Option<RestartPolicy>,
    pub health: Option<HealthProbe>,
}

/// Runtime adapter trait - common interface for container runtimes
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Get the runtime type name
    fn runtime_type(&self) -> &str;

    /// Check if the runtime is available and healthy
    async fn ping(&self) -> Result<bool>;

    /// Get runtime version information
    async fn version(&self) -> Result<String>;

    /// Find a container by exact name. `include_stopped` widens the
    /// search to containers that are not currently running.
    async fn find_container(
        &self,
        name: &str,
        include_stopped: bool,
    ) -> Result<Option<ContainerInfo>>;

    /// Create a new container
    async fn create_container(&self, spec: ContainerSpec) -> Result<String>;

    /// Start a container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, allowing `grace` before the runtime force kills it
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// Pull an image, authenticating against the registry when credentials
    /// are provided
    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()>;
}
