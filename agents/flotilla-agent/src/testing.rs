//! Test doubles for the runtime and control-plane seams, shared across
//! unit tests.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::http::ControlPlane;
use crate::connection::protocol::{Deployment, DeploymentStatus};
use crate::runtime::adapter::{
    ContainerInfo, ContainerSpec, ContainerStatus, RegistryAuth, RuntimeAdapter,
};

/// Scripted container runtime that records every call it receives.
#[derive(Default)]
pub struct MockRuntime {
    pub calls: Mutex<Vec<String>>,
    pub container: Mutex<Option<ContainerInfo>>,
    pub created_specs: Mutex<Vec<ContainerSpec>>,
    pub pull_error: Mutex<Option<String>>,
    pub create_error: Mutex<Option<String>>,
    pub start_error: Mutex<Option<String>>,
    pub find_error: Mutex<bool>,
    pub running_after_start: Mutex<bool>,
}

impl MockRuntime {
    pub fn new() -> Self {
        let runtime = Self::default();
        *runtime.running_after_start.lock() = true;
        runtime
    }

    pub fn with_container(self, info: ContainerInfo) -> Self {
        *self.container.lock() = Some(info);
        self
    }

    pub fn recorded(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

pub fn container_info(name: &str, image: &str, status: ContainerStatus) -> ContainerInfo {
    ContainerInfo {
        id: "c-1".to_string(),
        name: name.to_string(),
        image: image.to_string(),
        status,
        labels: HashMap::new(),
    }
}

pub fn deployment(id: &str) -> Deployment {
    Deployment {
        id: id.to_string(),
        ship_id: "ship-1".to_string(),
        image_name: "cargo-manifest".to_string(),
        image_tag: "1.2.0".to_string(),
        full_image_path: "registry.fleet.example:5000/cargo-manifest:1.2.0".to_string(),
        settings: HashMap::new(),
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    fn runtime_type(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<bool> {
        Ok(true)
    }

    async fn version(&self) -> Result<String> {
        Ok("mock".to_string())
    }

    async fn find_container(
        &self,
        name: &str,
        include_stopped: bool,
    ) -> Result<Option<ContainerInfo>> {
        self.record(format!("find:{name}:{include_stopped}"));
        if *self.find_error.lock() {
            return Err(anyhow!("runtime unavailable"));
        }
        let container = self.container.lock().clone();
        Ok(container.filter(|c| include_stopped || c.status == ContainerStatus::Running))
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String> {
        self.record(format!("create:{}", spec.name));
        if let Some(message) = self.create_error.lock().clone() {
            return Err(anyhow!(message));
        }
        *self.container.lock() = Some(ContainerInfo {
            id: "c-new".to_string(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            status: ContainerStatus::Created,
            labels: spec.labels.clone(),
        });
        self.created_specs.lock().push(spec);
        Ok("c-new".to_string())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.record(format!("start:{id}"));
        if let Some(message) = self.start_error.lock().clone() {
            return Err(anyhow!(message));
        }
        let status = if *self.running_after_start.lock() {
            ContainerStatus::Running
        } else {
            ContainerStatus::Exited
        };
        if let Some(container) = self.container.lock().as_mut() {
            container.status = status;
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        self.record(format!("stop:{id}"));
        if let Some(container) = self.container.lock().as_mut() {
            container.status = ContainerStatus::Exited;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.record(format!("remove:{id}:{force}"));
        *self.container.lock() = None;
        Ok(())
    }

    async fn pull_image(&self, image: &str, _auth: Option<&RegistryAuth>) -> Result<()> {
        self.record(format!("pull:{image}"));
        if let Some(message) = self.pull_error.lock().clone() {
            return Err(anyhow!(message));
        }
        Ok(())
    }
}

/// Control-plane double that records status reports and serves scripted
/// heartbeat responses.
#[derive(Default)]
pub struct MockControlPlane {
    pub reachable: Mutex<bool>,
    pub heartbeat_responses: Mutex<Vec<Vec<Deployment>>>,
    pub heartbeat_versions: Mutex<Vec<Option<String>>>,
    pub heartbeat_error: Mutex<Option<String>>,
    pub update_error: Mutex<Option<String>>,
    pub reports: Mutex<Vec<(String, DeploymentStatus, Option<String>)>>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        let plane = Self::default();
        *plane.reachable.lock() = true;
        plane
    }

    pub fn reported(&self) -> Vec<(String, DeploymentStatus, Option<String>)> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn probe_connectivity(&self) -> bool {
        *self.reachable.lock()
    }

    async fn send_heartbeat(&self, current_version: Option<String>) -> Result<Vec<Deployment>> {
        self.heartbeat_versions.lock().push(current_version);
        if let Some(message) = self.heartbeat_error.lock().clone() {
            return Err(anyhow!(message));
        }
        let mut responses = self.heartbeat_responses.lock();
        if responses.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        self.reports
            .lock()
            .push((deployment_id.to_string(), status, error_message));
        if let Some(message) = self.update_error.lock().clone() {
            return Err(anyhow!(message));
        }
        Ok(())
    }
}
