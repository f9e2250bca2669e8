//! HQ HTTP Client
//!
//! REST client for the control plane: connectivity probe, heartbeat with
//! pending-deployment discovery, and deployment status updates. Heartbeat
//! and status calls run under the HTTP retry policy; the probe is a cheap
//! single-shot pre-check.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, info};

use crate::connection::protocol::{
    Deployment, DeploymentStatus, HeartbeatRequest, HeartbeatResponse, HqStatusError,
    StatusUpdateRequest,
};
use crate::resilience::retry::{ResilientOperation, RetryPolicy};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Control-plane operations used by the scheduler and the deployment
/// processor. The production implementation is [`HqClient`].
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Cheap reachability check before the heavier heartbeat call.
    /// Returns false on any failure; never errors and never retries.
    async fn probe_connectivity(&self) -> bool;

    /// Check in with HQ and fetch the pending deployments for this ship.
    async fn send_heartbeat(&self, current_version: Option<String>) -> Result<Vec<Deployment>>;

    /// Report a deployment status transition to HQ.
    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<()>;
}

/// HTTP client for the HQ REST API
pub struct HqClient {
    http: Client,
    base_url: String,
    ship_id: String,
    resilience: ResilientOperation,
}

impl HqClient {
    pub fn new(base_url: &str, ship_id: &str, policy: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(policy.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ship_id: ship_id.to_string(),
            resilience: ResilientOperation::new("HQ request", policy),
        })
    }
}

#[async_trait]
impl ControlPlane for HqClient {
    async fn probe_connectivity(&self) -> bool {
        let url = format!("{}/api/ship", self.base_url);

        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "HQ connectivity probe failed");
                false
            }
        }
    }

    async fn send_heartbeat(&self, current_version: Option<String>) -> Result<Vec<Deployment>> {
        let url = format!("{}/api/ship/{}/heartbeat", self.base_url, self.ship_id);
        let http = &self.http;
        let ship_id = &self.ship_id;
        let url_str = url.as_str();
        let current = &current_version;

        let response: HeartbeatResponse = self
            .resilience
            .execute(|| {
                let request = HeartbeatRequest {
                    ship_id: ship_id.clone(),
                    current_version: current.clone(),
                    timestamp: Utc::now(),
                };
                async move {
                    debug!(url = %url_str, "Sending heartbeat");
                    let response = http
                        .post(url_str)
                        .json(&request)
                        .send()
                        .await
                        .context("Heartbeat request failed")?;

                    if !response.status().is_success() {
                        return Err(
                            HqStatusError::new("heartbeat", response.status()).into()
                        );
                    }

                    response
                        .json::<HeartbeatResponse>()
                        .await
                        .context("Failed to deserialize heartbeat response")
                }
            })
            .await?;

        if let Some(message) = &response.message {
            debug!(message = %message, "Heartbeat acknowledged");
        }
        Ok(response.pending_deployments)
    }

    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let url = format!("{}/api/ship/deployment/{}/status", self.base_url, deployment_id);
        let http = &self.http;
        let url_str = url.as_str();
        let error_message = &error_message;

        self.resilience
            .execute(|| {
                let request = StatusUpdateRequest {
                    status,
                    error_message: error_message.clone(),
                };
                async move {
                    debug!(url = %url_str, status = %status, "Updating deployment status");
                    let response = http
                        .put(url_str)
                        .json(&request)
                        .send()
                        .await
                        .context("Status update request failed")?;

                    if !response.status().is_success() {
                        return Err(
                            HqStatusError::new("status update", response.status()).into()
                        );
                    }
                    Ok(())
                }
            })
            .await?;

        info!(deployment_id = %deployment_id, status = %status, "Deployment status reported");
        Ok(())
    }
}
