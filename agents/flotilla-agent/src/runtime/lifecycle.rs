//! Container Lifecycle Manager
//!
//! Drives the single managed container slot on this ship: image pulls
//! under the pull retry policy, replacement of the previous container,
//! and state introspection. At most one container with the managed name
//! exists at a time; the previous container is always fully removed
//! before a new one is created.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::config::ContainerConfig;
use crate::connection::protocol::Deployment;
use crate::resilience::retry::{ResilientOperation, RetryPolicy};
use crate::runtime::adapter::{
    ContainerSpec, ContainerStatus, HealthProbe, PortBinding, RegistryAuth, RestartPolicy,
    RuntimeAdapter, VolumeBinding,
};

/// Label keys applied to every managed container.
pub const LABEL_DEPLOYMENT_ID: &str = "deployment.id";
pub const LABEL_VERSION: &str = "deployment.version";
pub const LABEL_SHIP_ID: &str = "deployment.ship_id";
pub const LABEL_TIMESTAMP: &str = "deployment.timestamp";
pub const LABEL_OPERATOR: &str = "deployment.operator";
pub const LABEL_APP_NAME: &str = "app.name";
pub const LABEL_APP_ENVIRONMENT: &str = "app.environment";

const OPERATOR: &str = "flotilla-agent";
const APP_ENVIRONMENT: &str = "production";
const DATA_MOUNT_TARGET: &str = "/app/data";
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Manages the lifecycle of the single named container on this ship.
pub struct ContainerLifecycleManager<R: RuntimeAdapter> {
    runtime: Arc<R>,
    container: ContainerConfig,
    ship_id: String,
    registry_auth: Option<RegistryAuth>,
    pull_resilience: ResilientOperation,
}

impl<R: RuntimeAdapter> ContainerLifecycleManager<R> {
    pub fn new(
        runtime: Arc<R>,
        container: ContainerConfig,
        ship_id: String,
        registry_auth: Option<RegistryAuth>,
        pull_policy: RetryPolicy,
    ) -> Self {
        Self {
            runtime,
            container,
            ship_id,
            registry_auth,
            pull_resilience: ResilientOperation::new("image pull", pull_policy),
        }
    }

    /// Pulls an image under the pull retry policy. A failure here aborts
    /// the deployment, so it propagates once the policy is exhausted.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");
        let runtime = &self.runtime;
        let auth = self.registry_auth.as_ref();

        self.pull_resilience
            .execute(|| async move { runtime.pull_image(image, auth).await })
            .await
            .with_context(|| format!("Failed to pull image {}", image))
    }

    /// Stops and removes the managed container if it exists. Failure to
    /// clean up the old container must never block starting the new one,
    /// so every error lands in the log and the call completes.
    pub async fn stop_and_remove(&self) {
        let name = &self.container.name;

        let existing = match self.runtime.find_container(name, true).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                debug!(container = %name, "No previous container to remove");
                return;
            }
            Err(e) => {
                warn!(container = %name, error = %e, "Could not inspect previous container");
                return;
            }
        };

        if existing.status == ContainerStatus::Running {
            info!(container_id = %existing.id, "Stopping previous container");
            if let Err(e) = self.runtime.stop_container(&existing.id, STOP_GRACE).await {
                warn!(container_id = %existing.id, error = %e, "Graceful stop failed, removal will force it");
            }
        }

        if let Err(e) = self.runtime.remove_container(&existing.id, true).await {
            warn!(container_id = %existing.id, error = %e, "Failed to remove previous container");
        } else {
            info!(container_id = %existing.id, "Previous container removed");
        }
    }

    /// Creates and starts the container for a deployment. A failure at
    /// either step propagates - an unstartable container must fail the
    /// deployment.
    pub async fn create_and_start(&self, deployment: &Deployment) -> Result<String> {
        let spec = self.build_spec(deployment);

        let container_id = self
            .runtime
            .create_container(spec)
            .await
            .context("Failed to create container")?;

        self.runtime
            .start_container(&container_id)
            .await
            .context("Failed to start container")?;

        info!(
            container_id = %container_id,
            image = %deployment.full_image_path,
            "Container created and started"
        );
        Ok(container_id)
    }

    /// Whether the managed container is confirmed running. Errors are
    /// suppressed to false: cannot-determine counts as not running.
    pub async fn is_running(&self) -> bool {
        match self.runtime.find_container(&self.container.name, false).await {
            Ok(Some(container)) => container.status == ContainerStatus::Running,
            Ok(None) => false,
            Err(e) => {
                debug!(error = %e, "Could not determine container state");
                false
            }
        }
    }

    /// Version currently deployed on this ship, from the version label of
    /// the managed container or, failing that, the tag segment of its
    /// image reference.
    pub async fn current_version(&self) -> Option<String> {
        let container = match self.runtime.find_container(&self.container.name, true).await {
            Ok(Some(container)) => container,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Could not read current version");
                return None;
            }
        };

        if let Some(version) = container.labels.get(LABEL_VERSION) {
            return Some(version.clone());
        }
        image_tag(&container.image)
    }

    fn build_spec(&self, deployment: &Deployment) -> ContainerSpec {
        // Deployment settings first, then the base set on top so reserved
        // keys always win.
        let mut env: HashMap<String, String> = deployment.settings.clone();
        for (key, value) in self.base_env(deployment) {
            env.insert(key, value);
        }

        let timestamp = Utc::now().to_rfc3339();
        let mut labels = HashMap::new();
        labels.insert(LABEL_DEPLOYMENT_ID.to_string(), deployment.id.clone());
        labels.insert(LABEL_VERSION.to_string(), deployment.image_tag.clone());
        labels.insert(LABEL_SHIP_ID.to_string(), self.ship_id.clone());
        labels.insert(LABEL_TIMESTAMP.to_string(), timestamp);
        labels.insert(LABEL_OPERATOR.to_string(), OPERATOR.to_string());
        labels.insert(LABEL_APP_NAME.to_string(), deployment.image_name.clone());
        labels.insert(LABEL_APP_ENVIRONMENT.to_string(), APP_ENVIRONMENT.to_string());

        let port = self.container.container_port;

        ContainerSpec {
            name: self.container.name.clone(),
            image: deployment.full_image_path.clone(),
            env: env.into_iter().collect(),
            ports: vec![PortBinding {
                container_port: port,
                host_port: self.container.host_port,
                protocol: "tcp".to_string(),
            }],
            volumes: vec![VolumeBinding {
                source: self.container.data_dir.clone(),
                target: DATA_MOUNT_TARGET.to_string(),
                read_only: false,
            }],
            labels,
            working_dir: None,
            memory_limit_bytes: Some(self.container.memory_limit_mb as i64 * 1024 * 1024),
            cpu_count: Some(self.container.cpu_count),
            restart_policy: Some(RestartPolicy::UnlessStopped),
            health: Some(HealthProbe {
                test: vec![
                    "CMD-SHELL".to_string(),
                    format!("curl -fsS http://localhost:{}/ || exit 1", port),
                ],
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
                retries: 3,
                start_period: Duration::from_secs(30),
            }),
        }
    }

    fn base_env(&self, deployment: &Deployment) -> Vec<(String, String)> {
        vec![
            ("APP_ENVIRONMENT".to_string(), APP_ENVIRONMENT.to_string()),
            ("FLEET_MANAGED".to_string(), "true".to_string()),
            ("DEPLOYMENT_ID".to_string(), deployment.id.clone()),
            ("DEPLOYMENT_VERSION".to_string(), deployment.image_tag.clone()),
            ("DEPLOYMENT_TIMESTAMP".to_string(), Utc::now().to_rfc3339()),
            ("DEPLOYED_BY".to_string(), OPERATOR.to_string()),
        ]
    }
}

/// Tag segment of an image reference, if present.
fn image_tag(image: &str) -> Option<String> {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{container_info, deployment, MockRuntime};

    fn manager(runtime: Arc<MockRuntime>) -> ContainerLifecycleManager<MockRuntime> {
        ContainerLifecycleManager::new(
            runtime,
            ContainerConfig::default(),
            "ship-1".to_string(),
            None,
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn test_image_tag_parsing() {
        assert_eq!(
            image_tag("registry.fleet.example:5000/cargo-manifest:1.4.2"),
            Some("1.4.2".to_string())
        );
        assert_eq!(image_tag("cargo-manifest:latest"), Some("latest".to_string()));
        assert_eq!(image_tag("registry.fleet.example:5000/cargo-manifest"), None);
        assert_eq!(image_tag("cargo-manifest"), None);
    }

    #[tokio::test]
    async fn test_stop_and_remove_absent_container() {
        let runtime = Arc::new(MockRuntime::new());
        manager(runtime.clone()).stop_and_remove().await;

        let calls = runtime.recorded();
        assert_eq!(calls, vec!["find:flotilla-app:true"]);
    }

    #[tokio::test]
    async fn test_stop_and_remove_running_container() {
        let runtime = Arc::new(MockRuntime::new().with_container(container_info(
            "flotilla-app",
            "cargo-manifest:1.0.0",
            ContainerStatus::Running,
        )));
        manager(runtime.clone()).stop_and_remove().await;

        let calls = runtime.recorded();
        assert!(calls.contains(&"stop:c-1".to_string()));
        assert!(calls.contains(&"remove:c-1:true".to_string()));
        assert!(runtime.container.lock().is_none());
    }

    #[tokio::test]
    async fn test_stop_and_remove_skips_stop_for_exited_container() {
        let runtime = Arc::new(MockRuntime::new().with_container(container_info(
            "flotilla-app",
            "cargo-manifest:1.0.0",
            ContainerStatus::Exited,
        )));
        manager(runtime.clone()).stop_and_remove().await;

        let calls = runtime.recorded();
        assert!(!calls.iter().any(|c| c.starts_with("stop:")));
        assert!(calls.contains(&"remove:c-1:true".to_string()));
    }

    #[tokio::test]
    async fn test_create_and_start_includes_base_env() {
        let runtime = Arc::new(MockRuntime::new());
        let mut work = deployment("dep-1");
        work.settings.insert("LOG_LEVEL".to_string(), "debug".to_string());
        // Reserved keys must not be overridable by HQ-supplied settings
        work.settings
            .insert("DEPLOYMENT_ID".to_string(), "spoofed".to_string());

        manager(runtime.clone())
            .create_and_start(&work)
            .await
            .unwrap();

        let specs = runtime.created_specs.lock();
        let env: HashMap<_, _> = specs[0].env.iter().cloned().collect();
        assert_eq!(env.get("LOG_LEVEL").unwrap(), "debug");
        assert_eq!(env.get("DEPLOYMENT_ID").unwrap(), "dep-1");
        assert_eq!(env.get("DEPLOYMENT_VERSION").unwrap(), "1.2.0");
        assert_eq!(env.get("DEPLOYED_BY").unwrap(), OPERATOR);
        assert_eq!(env.get("FLEET_MANAGED").unwrap(), "true");
        assert!(env.contains_key("DEPLOYMENT_TIMESTAMP"));
    }

    #[tokio::test]
    async fn test_create_and_start_spec_shape() {
        let runtime = Arc::new(MockRuntime::new());
        manager(runtime.clone())
            .create_and_start(&deployment("dep-1"))
            .await
            .unwrap();

        let specs = runtime.created_specs.lock();
        let spec = &specs[0];
        assert_eq!(spec.name, "flotilla-app");
        assert_eq!(spec.ports[0].container_port, 80);
        assert_eq!(spec.ports[0].host_port, 8080);
        assert_eq!(spec.volumes[0].target, "/app/data");
        assert_eq!(spec.memory_limit_bytes, Some(2048 * 1024 * 1024));
        assert_eq!(spec.restart_policy, Some(RestartPolicy::UnlessStopped));
        assert_eq!(spec.labels.get(LABEL_VERSION).unwrap(), "1.2.0");
        assert_eq!(spec.labels.get(LABEL_SHIP_ID).unwrap(), "ship-1");
        assert_eq!(spec.labels.get(LABEL_OPERATOR).unwrap(), OPERATOR);

        let health = spec.health.as_ref().unwrap();
        assert_eq!(health.retries, 3);
        assert_eq!(health.interval, Duration::from_secs(30));
        assert!(health.test[1].contains("localhost:80"));
    }

    #[tokio::test]
    async fn test_is_running() {
        let runtime = Arc::new(MockRuntime::new().with_container(container_info(
            "flotilla-app",
            "cargo-manifest:1.0.0",
            ContainerStatus::Running,
        )));
        assert!(manager(runtime).is_running().await);

        let runtime = Arc::new(MockRuntime::new().with_container(container_info(
            "flotilla-app",
            "cargo-manifest:1.0.0",
            ContainerStatus::Exited,
        )));
        assert!(!manager(runtime).is_running().await);

        let runtime = Arc::new(MockRuntime::new());
        *runtime.find_error.lock() = true;
        assert!(!manager(runtime).is_running().await);
    }

    #[tokio::test]
    async fn test_current_version_from_label() {
        let mut info = container_info(
            "flotilla-app",
            "cargo-manifest:1.0.0",
            ContainerStatus::Running,
        );
        info.labels
            .insert(LABEL_VERSION.to_string(), "2.3.4".to_string());

        let runtime = Arc::new(MockRuntime::new().with_container(info));
        assert_eq!(
            manager(runtime).current_version().await,
            Some("2.3.4".to_string())
        );
    }

    #[tokio::test]
    async fn test_current_version_falls_back_to_tag() {
        let runtime = Arc::new(MockRuntime::new().with_container(container_info(
            "flotilla-app",
            "registry.fleet.example:5000/cargo-manifest:1.0.0",
            ContainerStatus::Exited,
        )));
        assert_eq!(
            manager(runtime).current_version().await,
            Some("1.0.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_current_version_absent() {
        let runtime = Arc::new(MockRuntime::new());
        assert_eq!(manager(runtime).current_version().await, None);

        let runtime = Arc::new(MockRuntime::new());
        *runtime.find_error.lock() = true;
        assert_eq!(manager(runtime).current_version().await, None);
    }
}
