//! HQ Wire Protocol
//!
//! Defines the request and response types exchanged with HQ over REST.
//! HQ speaks PascalCase JSON; responses additionally accept camelCase
//! field names so the agent tolerates either casing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of deployment work issued by HQ.
///
/// Immutable once received; the agent consumes it and discards it, it is
/// never persisted locally.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Deployment {
    #[serde(alias = "id")]
    pub id: String,

    #[serde(alias = "shipId")]
    pub ship_id: String,

    #[serde(alias = "imageName")]
    pub image_name: String,

    #[serde(alias = "imageTag")]
    pub image_tag: String,

    /// Registry-qualified image reference used for pull and run.
    #[serde(alias = "fullImagePath")]
    pub full_image_path: String,

    /// Injected into the container as environment variables.
    #[serde(default, alias = "settings")]
    pub settings: HashMap<String, String>,
}

/// Deployment lifecycle status as reported to HQ.
///
/// `Pending` is HQ's own state before the agent sees the deployment; the
/// agent only ever reports `Downloaded`, `Deployed`, or `Failed`. The
/// latter two are terminal - a failed deployment is not retried here, HQ
/// must re-issue it as a new deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Pending,
    Downloaded,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    /// Whether this status ends the deployment's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "Pending"),
            DeploymentStatus::Downloaded => write!(f, "Downloaded"),
            DeploymentStatus::Deployed => write!(f, "Deployed"),
            DeploymentStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Check-in payload sent to HQ each cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatRequest {
    pub ship_id: String,
    pub current_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// HQ's answer to a heartbeat: pending work for this ship, if any.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HeartbeatResponse {
    #[serde(default, alias = "message")]
    pub message: Option<String>,

    #[serde(default, alias = "pendingDeployments")]
    pub pending_deployments: Vec<Deployment>,
}

/// Status transition report for a single deployment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusUpdateRequest {
    pub status: DeploymentStatus,
    pub error_message: Option<String>,
}

/// Non-success response from HQ.
///
/// The retry predicate treats this like a network failure, so transient
/// server-side errors get the same backoff as connection problems.
#[derive(Debug, Error)]
#[error("HQ returned {status} during {operation}")]
pub struct HqStatusError {
    pub operation: &'static str,
    pub status: reqwest::StatusCode,
}

impl HqStatusError {
    pub fn new(operation: &'static str, status: reqwest::StatusCode) -> Self {
        Self { operation, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_request_serializes_pascal_case() {
        let request = HeartbeatRequest {
            ship_id: "ship-7".to_string(),
            current_version: Some("1.4.2".to_string()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"ShipId\":\"ship-7\""));
        assert!(json.contains("\"CurrentVersion\":\"1.4.2\""));
        assert!(json.contains("\"Timestamp\""));
    }

    #[test]
    fn test_heartbeat_response_pascal_case() {
        let json = r#"{
            "Message": "1 deployment pending",
            "PendingDeployments": [{
                "Id": "dep-1",
                "ShipId": "ship-7",
                "ImageName": "cargo-manifest",
                "ImageTag": "1.4.2",
                "FullImagePath": "registry.fleet.example:5000/cargo-manifest:1.4.2",
                "Settings": {"LOG_LEVEL": "debug"}
            }]
        }"#;

        let response: HeartbeatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.pending_deployments.len(), 1);

        let deployment = &response.pending_deployments[0];
        assert_eq!(deployment.id, "dep-1");
        assert_eq!(deployment.image_tag, "1.4.2");
        assert_eq!(deployment.settings.get("LOG_LEVEL").unwrap(), "debug");
    }

    #[test]
    fn test_heartbeat_response_camel_case() {
        let json = r#"{
            "message": "ok",
            "pendingDeployments": [{
                "id": "dep-2",
                "shipId": "ship-7",
                "imageName": "cargo-manifest",
                "imageTag": "2.0.0",
                "fullImagePath": "registry.fleet.example:5000/cargo-manifest:2.0.0"
            }]
        }"#;

        let response: HeartbeatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.pending_deployments[0].id, "dep-2");
        assert!(response.pending_deployments[0].settings.is_empty());
    }

    #[test]
    fn test_heartbeat_response_without_deployments() {
        let response: HeartbeatResponse = serde_json::from_str(r#"{"Message": "nothing pending"}"#).unwrap();
        assert!(response.pending_deployments.is_empty());
    }

    #[test]
    fn test_status_serializes_as_enum_name() {
        let request = StatusUpdateRequest {
            status: DeploymentStatus::Downloaded,
            error_message: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"Status\":\"Downloaded\""));
        assert!(json.contains("\"ErrorMessage\":null"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DeploymentStatus::Deployed.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(!DeploymentStatus::Pending.is_terminal());
        assert!(!DeploymentStatus::Downloaded.is_terminal());
    }
}
