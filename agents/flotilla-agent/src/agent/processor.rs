//! Deployment Processor
//!
//! Drives one deployment from a heartbeat through pull, container
//! replacement, and verification to a terminal status report:
//! pull -> Downloaded -> stop old -> start new -> settle -> verify ->
//! Deployed or Failed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::connection::http::ControlPlane;
use crate::connection::protocol::{Deployment, DeploymentStatus};
use crate::runtime::adapter::RuntimeAdapter;
use crate::runtime::lifecycle::ContainerLifecycleManager;

/// Processes deployments received from HQ, one at a time.
pub struct DeploymentProcessor<R: RuntimeAdapter, C: ControlPlane> {
    lifecycle: Arc<ContainerLifecycleManager<R>>,
    control_plane: Arc<C>,
    /// Fixed wait before the running check, in place of active readiness
    /// polling.
    settle_delay: Duration,
}

impl<R: RuntimeAdapter, C: ControlPlane> DeploymentProcessor<R, C> {
    pub fn new(
        lifecycle: Arc<ContainerLifecycleManager<R>>,
        control_plane: Arc<C>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            lifecycle,
            control_plane,
            settle_delay,
        }
    }

    /// Processes one deployment to a terminal status. Never errors:
    /// every failure ends as a Failed report, and control always returns
    /// to the loop.
    pub async fn process(&self, deployment: &Deployment) {
        info!(
            deployment_id = %deployment.id,
            image = %deployment.full_image_path,
            "Processing deployment"
        );

        if let Err(e) = self.run(deployment).await {
            error!(deployment_id = %deployment.id, error = %e, "Deployment failed");
            self.report(deployment, DeploymentStatus::Failed, Some(format!("{e:#}")))
                .await;
        }
    }

    async fn run(&self, deployment: &Deployment) -> Result<()> {
        self.lifecycle.pull_image(&deployment.full_image_path).await?;
        self.report(deployment, DeploymentStatus::Downloaded, None).await;

        // Best-effort: a stale container must not block the new one.
        self.lifecycle.stop_and_remove().await;

        let container_id = self.lifecycle.create_and_start(deployment).await?;

        debug!(
            deployment_id = %deployment.id,
            container_id = %container_id,
            settle_secs = self.settle_delay.as_secs(),
            "Waiting for container to settle"
        );
        tokio::time::sleep(self.settle_delay).await;

        if self.lifecycle.is_running().await {
            info!(deployment_id = %deployment.id, "Deployment verified");
            self.report(deployment, DeploymentStatus::Deployed, None).await;
        } else {
            warn!(deployment_id = %deployment.id, "Container not running after settle period");
            self.report(
                deployment,
                DeploymentStatus::Failed,
                Some("Container failed to start".to_string()),
            )
            .await;
        }

        Ok(())
    }

    /// Best-effort status report. On failure HQ's view stays stale until
    /// the next successful heartbeat; the agent keeps running.
    async fn report(
        &self,
        deployment: &Deployment,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) {
        if let Err(e) = self
            .control_plane
            .update_deployment_status(&deployment.id, status, error_message)
            .await
        {
            warn!(
                deployment_id = %deployment.id,
                status = %status,
                error = %e,
                "Failed to report deployment status"
            );
        }
    }
}
