//! Flotilla Agent CLI Entry Point
//!
//! This is the main entry point for the Flotilla Agent binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flotilla_agent::agent::processor::DeploymentProcessor;
use flotilla_agent::agent::scheduler::AgentLoop;
use flotilla_agent::cli::config::{Config, LoggingConfig};
use flotilla_agent::connection::http::HqClient;
use flotilla_agent::runtime::docker::adapter::DockerAdapter;
use flotilla_agent::runtime::lifecycle::ContainerLifecycleManager;
use flotilla_agent::runtime::adapter::RuntimeAdapter;

#[derive(Parser)]
#[command(name = "flotilla-agent")]
#[command(author, version, about = "Flotilla Agent - fleet-edge deployment agent")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/flotilla/agent.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the agent
    Start,
    /// Show agent status
    Status,
    /// Install the agent as a system service
    Install {
        /// Service name
        #[arg(short, long, default_value = "flotilla-agent")]
        name: String,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            start_agent(&cli.config, cli.verbose).await?;
        }
        Commands::Status => {
            show_status(&cli.config).await?;
        }
        Commands::Install { name } => {
            install_service(&name)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let default_directive = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match config.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

async fn start_agent(config_path: &PathBuf, verbose: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    init_logging(&config.logging, verbose);

    info!("Starting Flotilla Agent...");
    info!(ship_id = %config.ship_id, hq_url = %config.hq.url, "Configuration loaded");

    // Initialize Docker adapter
    let docker = DockerAdapter::new().context("Failed to initialize Docker adapter")?;

    // Verify Docker is accessible
    let version = docker
        .version()
        .await
        .context("Failed to get Docker version")?;
    info!(docker_version = %version, "Docker runtime initialized");

    let runtime = Arc::new(docker);

    let lifecycle = Arc::new(ContainerLifecycleManager::new(
        runtime,
        config.container.clone(),
        config.ship_id.clone(),
        config.registry.auth(),
        config.resilience.image_pull.policy(),
    ));

    let hq = Arc::new(HqClient::new(
        &config.hq.url,
        &config.ship_id,
        config.resilience.http.policy(),
    )?);

    let processor = DeploymentProcessor::new(
        lifecycle.clone(),
        hq.clone(),
        config.schedule.settle_delay(),
    );

    let mut agent_loop = AgentLoop::new(hq, lifecycle, processor, &config.schedule);

    // Wire ctrl-c to cooperative cancellation
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_cancel.cancel();
        }
    });

    agent_loop.run(cancel).await;

    Ok(())
}

async fn show_status(config_path: &PathBuf) -> Result<()> {
    let config = Config::load_or_default(config_path)?;

    println!("Agent Status: checking...");
    println!("  Ship: {}", config.ship_id);
    println!("  HQ: {}", config.hq.url);

    match DockerAdapter::new() {
        Ok(docker) => {
            match docker.version().await {
                Ok(version) => println!("  Docker: {} (connected)", version),
                Err(e) => println!("  Docker: error - {}", e),
            }

            match docker.find_container(&config.container.name, true).await {
                Ok(Some(container)) => {
                    println!(
                        "  Managed container: {} ({}, image {})",
                        container.name, container.status, container.image
                    );
                }
                Ok(None) => println!("  Managed container: not present"),
                Err(e) => println!("  Managed container: error - {}", e),
            }
        }
        Err(e) => println!("  Docker: not available - {}", e),
    }

    Ok(())
}

fn install_service(name: &str) -> Result<()> {
    println!("Installing service: {}", name);

    // Generate systemd service file
    let service_content = r#"[Unit]
Description=Flotilla Agent
After=network.target docker.service
Requires=docker.service

[Service]
Type=simple
ExecStart=/usr/local/bin/flotilla-agent start
Restart=always
RestartSec=5
User=root
Environment=RUST_LOG=info

[Install]
WantedBy=multi-user.target
"#;

    let service_path = format!("/etc/systemd/system/{}.service", name);
    println!("Service file would be created at: {}", service_path);
    println!("\nService content:");
    println!("{}", service_content);
    println!("\nTo install manually, run:");
    println!("  sudo cp flotilla-agent /usr/local/bin/");
    println!("  sudo nano {}", service_path);
    println!("  sudo systemctl daemon-reload");
    println!("  sudo systemctl enable {}", name);
    println!("  sudo systemctl start {}", name);

    Ok(())
}

fn show_version() {
    println!("flotilla-agent {}", env!("CARGO_PKG_VERSION"));
    println!("Fleet-edge deployment agent for ship containers");
    println!();
    println!("Features:");
    println!("  - Periodic HQ heartbeat with pending-deployment discovery");
    println!("  - Docker container lifecycle management");
    println!("  - Retry with exponential backoff and jitter");
    println!("  - Deployment status reporting");
}
