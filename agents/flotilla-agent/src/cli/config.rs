//! Configuration module
//!
//! Handles loading and validating agent configuration from TOML files,
//! with environment-variable overrides for deploy-sensitive values.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resilience::retry::RetryPolicy;
use crate::runtime::adapter::RegistryAuth;

/// Main configuration structure for the Flotilla Agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identifier of the ship this agent runs on
    #[serde(default = "default_ship_id")]
    pub ship_id: String,

    /// HQ connection settings
    #[serde(default)]
    pub hq: HqConfig,

    /// Managed container settings
    #[serde(default)]
    pub container: ContainerConfig,

    /// Registry credentials for image pulls
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Retry policies
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Polling schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HQ connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HqConfig {
    /// Base URL of the HQ REST API
    #[serde(default = "default_hq_url")]
    pub url: String,
}

/// Managed container configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Fixed name of the single managed container
    #[serde(default = "default_container_name")]
    pub name: String,

    /// Port the application listens on inside the container
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Host port the container port is published on
    #[serde(default = "default_host_port")]
    pub host_port: u16,

    /// Host directory bind-mounted into the container at /app/data
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Memory ceiling in MiB
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    /// CPU ceiling
    #[serde(default = "default_cpu_count")]
    pub cpu_count: f64,
}

/// Registry credentials
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RegistryConfig {
    /// Credentials for the runtime, if any are configured.
    pub fn auth(&self) -> Option<RegistryAuth> {
        if self.username.is_none() && self.password.is_none() {
            return None;
        }
        Some(RegistryAuth {
            username: self.username.clone(),
            password: self.password.clone(),
        })
    }
}

/// Retry policy parameters for one class of operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub timeout_secs: u64,
}

impl RetryConfig {
    fn http_default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
            max_delay_secs: 10,
            timeout_secs: 30,
        }
    }

    fn image_pull_default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2,
            max_delay_secs: 30,
            timeout_secs: 600,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Retry policies for HTTP calls and image pulls, independently tunable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "RetryConfig::http_default")]
    pub http: RetryConfig,

    #[serde(default = "RetryConfig::image_pull_default")]
    pub image_pull: RetryConfig,
}

/// Polling schedule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between heartbeat cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Shortened wait after a cycle error
    #[serde(default = "default_error_retry_secs")]
    pub error_retry_secs: u64,

    /// Seconds to let a freshly started container settle before the
    /// running check
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl ScheduleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_retry_interval(&self) -> Duration {
        Duration::from_secs(self.error_retry_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions

fn default_ship_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| Uuid::new_v4().to_string())
}

fn default_hq_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_container_name() -> String {
    "flotilla-app".to_string()
}

fn default_container_port() -> u16 {
    80
}

fn default_host_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "/var/lib/flotilla/data".to_string()
}

fn default_memory_limit_mb() -> u64 {
    2048
}

fn default_cpu_count() -> f64 {
    2.0
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_error_retry_secs() -> u64 {
    60
}

fn default_settle_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for HqConfig {
    fn default() -> Self {
        Self {
            url: default_hq_url(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: default_container_name(),
            container_port: default_container_port(),
            host_port: default_host_port(),
            data_dir: default_data_dir(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_count: default_cpu_count(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            http: RetryConfig::http_default(),
            image_pull: RetryConfig::image_pull_default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            error_retry_secs: default_error_retry_secs(),
            settle_secs: default_settle_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Self::default_config();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            ship_id: default_ship_id(),
            hq: HqConfig::default(),
            container: ContainerConfig::default(),
            registry: RegistryConfig::default(),
            resilience: ResilienceConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("FLOTILLA_SHIP_ID") {
            self.ship_id = value;
        }
        if let Ok(value) = std::env::var("FLOTILLA_HQ_URL") {
            self.hq.url = value;
        }
        if let Ok(value) = std::env::var("FLOTILLA_CONTAINER_NAME") {
            self.container.name = value;
        }
        if let Ok(value) = std::env::var("FLOTILLA_REGISTRY_USERNAME") {
            self.registry.username = Some(value);
        }
        if let Ok(value) = std::env::var("FLOTILLA_REGISTRY_PASSWORD") {
            self.registry.password = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert!(!config.ship_id.is_empty());
        assert_eq!(config.hq.url, "http://localhost:5000");
        assert_eq!(config.container.name, "flotilla-app");
        assert_eq!(config.container.host_port, 8080);
        assert_eq!(config.schedule.poll_interval_secs, 300);
        assert_eq!(config.resilience.http.max_retries, 3);
        assert_eq!(config.resilience.image_pull.timeout_secs, 600);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_content = r#"
            ship_id = "test-ship-123"

            [hq]
            url = "https://hq.fleet.example"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.ship_id, "test-ship-123");
        assert_eq!(config.hq.url, "https://hq.fleet.example");
        assert_eq!(config.container.container_port, 80);
        assert_eq!(config.schedule.settle_secs, 10);
    }

    #[test]
    fn test_parse_retry_overrides() {
        let toml_content = r#"
            [resilience.http]
            max_retries = 5
            base_delay_secs = 2
            max_delay_secs = 20
            timeout_secs = 60
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.resilience.http.max_retries, 5);
        // The pull policy keeps its own defaults
        assert_eq!(config.resilience.image_pull.base_delay_secs, 2);
        assert_eq!(config.resilience.image_pull.timeout_secs, 600);
    }

    #[test]
    fn test_registry_auth() {
        let config = RegistryConfig::default();
        assert!(config.auth().is_none());

        let config = RegistryConfig {
            username: Some("deployer".to_string()),
            password: Some("secret".to_string()),
        };
        let auth = config.auth().unwrap();
        assert_eq!(auth.username.as_deref(), Some("deployer"));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("FLOTILLA_SHIP_ID", "env-ship");
        std::env::set_var("FLOTILLA_HQ_URL", "https://env.fleet.example");

        let mut config = Config::default_config();
        config.apply_env_overrides();

        assert_eq!(config.ship_id, "env-ship");
        assert_eq!(config.hq.url, "https://env.fleet.example");

        std::env::remove_var("FLOTILLA_SHIP_ID");
        std::env::remove_var("FLOTILLA_HQ_URL");
    }
}
