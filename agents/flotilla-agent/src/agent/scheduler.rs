//! Agent Scheduling Loop
//!
//! The top-level polling loop: every cycle it probes HQ connectivity,
//! refreshes the current deployed version, sends a heartbeat, and hands
//! any pending deployments to the processor strictly in response order.
//! One bad cycle never kills the process; the loop only stops on
//! cancellation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::agent::processor::DeploymentProcessor;
use crate::cli::config::ScheduleConfig;
use crate::connection::http::ControlPlane;
use crate::runtime::adapter::RuntimeAdapter;
use crate::runtime::lifecycle::ContainerLifecycleManager;

/// Top-level scheduler for the agent.
pub struct AgentLoop<R: RuntimeAdapter, C: ControlPlane> {
    control_plane: Arc<C>,
    lifecycle: Arc<ContainerLifecycleManager<R>>,
    processor: DeploymentProcessor<R, C>,
    poll_interval: Duration,
    error_retry_interval: Duration,
    /// Version reported in heartbeats, refreshed once per cycle.
    current_version: Option<String>,
}

impl<R: RuntimeAdapter, C: ControlPlane> AgentLoop<R, C> {
    pub fn new(
        control_plane: Arc<C>,
        lifecycle: Arc<ContainerLifecycleManager<R>>,
        processor: DeploymentProcessor<R, C>,
        schedule: &ScheduleConfig,
    ) -> Self {
        Self {
            control_plane,
            lifecycle,
            processor,
            poll_interval: schedule.poll_interval(),
            error_retry_interval: schedule.error_retry_interval(),
            current_version: None,
        }
    }

    /// Runs until the cancellation token fires. Cancellation is checked
    /// at cycle boundaries and raced against the in-cycle work and the
    /// sleeps, so shutdown never waits out a full poll interval.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Agent loop started"
        );

        self.current_version = self.lifecycle.current_version().await;

        loop {
            let wait = tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                result = self.cycle() => match result {
                    Ok(()) => self.poll_interval,
                    Err(e) => {
                        error!(error = %e, "Cycle failed, shortening next wait");
                        self.error_retry_interval
                    }
                },
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                () = tokio::time::sleep(wait) => {}
            }
        }

        info!("Agent loop stopped");
    }

    async fn cycle(&mut self) -> Result<()> {
        if !self.control_plane.probe_connectivity().await {
            info!("HQ unreachable, skipping this cycle");
            return Ok(());
        }

        self.current_version = self.lifecycle.current_version().await;

        let deployments = self
            .control_plane
            .send_heartbeat(self.current_version.clone())
            .await
            .context("Heartbeat failed")?;

        if deployments.is_empty() {
            debug!("No pending deployments");
            return Ok(());
        }

        info!(count = deployments.len(), "Received pending deployments");
        for deployment in &deployments {
            self.processor.process(deployment).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::ContainerConfig;
    use crate::connection::protocol::DeploymentStatus;
    use crate::resilience::retry::RetryPolicy;
    use crate::runtime::lifecycle::LABEL_VERSION;
    use crate::testing::{container_info, deployment, MockControlPlane, MockRuntime};
    use crate::runtime::adapter::ContainerStatus;

    fn agent_loop(
        runtime: Arc<MockRuntime>,
        control_plane: Arc<MockControlPlane>,
    ) -> AgentLoop<MockRuntime, MockControlPlane> {
        let lifecycle = Arc::new(ContainerLifecycleManager::new(
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
        ));
        let processor = DeploymentProcessor::new(
            lifecycle.clone(),
            control_plane.clone(),
            Duration::from_millis(1),
        );
        let schedule = ScheduleConfig {
            poll_interval_secs: 300,
            error_retry_secs: 60,
            settle_secs: 0,
        };
        AgentLoop::new(control_plane, lifecycle, processor, &schedule)
    }

    #[tokio::test]
    async fn test_unreachable_hq_skips_heartbeat() {
        let runtime = Arc::new(MockRuntime::new());
        let control_plane = Arc::new(MockControlPlane::new());
        *control_plane.reachable.lock() = false;

        let mut agent = agent_loop(runtime, control_plane.clone());
        agent.cycle().await.unwrap();

        assert!(control_plane.heartbeat_versions.lock().is_empty());
        assert!(control_plane.reported().is_empty());
    }

    #[tokio::test]
    async fn test_deployments_processed_in_response_order() {
        let runtime = Arc::new(MockRuntime::new());
        let control_plane = Arc::new(MockControlPlane::new());
        control_plane
            .heartbeat_responses
            .lock()
            .push(vec![deployment("dep-1"), deployment("dep-2")]);

        let mut agent = agent_loop(runtime, control_plane.clone());
        agent.cycle().await.unwrap();

        let reports = control_plane.reported();
        assert_eq!(reports.len(), 4);
        // dep-1 reaches a terminal status before dep-2 starts
        assert_eq!(reports[0].0, "dep-1");
        assert_eq!(reports[1].0, "dep-1");
        assert_eq!(reports[1].1, DeploymentStatus::Deployed);
        assert_eq!(reports[2].0, "dep-2");
        assert_eq!(reports[3].0, "dep-2");
    }

    #[tokio::test]
    async fn test_heartbeat_error_surfaces_from_cycle() {
        let runtime = Arc::new(MockRuntime::new());
        let control_plane = Arc::new(MockControlPlane::new());
        *control_plane.heartbeat_error.lock() = Some("boom".to_string());

        let mut agent = agent_loop(runtime, control_plane);
        assert!(agent.cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_carries_current_version() {
        let mut info = container_info(
            "flotilla-app",
            "cargo-manifest:1.0.0",
            ContainerStatus::Running,
        );
        info.labels
            .insert(LABEL_VERSION.to_string(), "1.0.0".to_string());
        let runtime = Arc::new(MockRuntime::new().with_container(info));
        let control_plane = Arc::new(MockControlPlane::new());

        let mut agent = agent_loop(runtime, control_plane.clone());
        agent.cycle().await.unwrap();

        let versions = control_plane.heartbeat_versions.lock();
        assert_eq!(versions[0], Some("1.0.0".to_string()));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let runtime = Arc::new(MockRuntime::new());
        let control_plane = Arc::new(MockControlPlane::new());
        *control_plane.reachable.lock() = false;

        let mut agent = agent_loop(runtime, control_plane);
        let cancel = CancellationToken::new();
        let signal = cancel.clone();

        let handle = tokio::spawn(async move {
            agent.run(cancel).await;
        });

        signal.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop after cancellation")
            .unwrap();
    }
}
