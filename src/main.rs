//! Door sensor agent - Main Entry Point
//!
//! Loads configuration from the environment, opens the GPIO line and the
//! broker client, then runs until SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use door_sensor_agent::agent::{Runner, RunnerSettings};
use door_sensor_agent::config::{load_env_file, AgentConfig};
use door_sensor_agent::error::AgentError;
use door_sensor_agent::lifecycle_span;
use door_sensor_agent::observability::{init_logging, LogSettings};
use door_sensor_agent::sensor::sysfs::SYSFS_GPIO_ROOT;
use door_sensor_agent::sensor::SysfsGpioSensor;
use door_sensor_agent::transport::mqtt::MqttBroker;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Instrument};

/// Door reed switch publishing agent
#[derive(Parser)]
#[command(name = "door-sensor-agent")]
#[command(about = "Publishes door open events and heartbeats to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Environment file merged into the process environment
    #[arg(short, long, value_name = "FILE", env = "DOOR_SENSOR_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load the env file first so LOG_* settings in it apply
    let env_file = load_env_file(cli.env_file.as_deref());

    let log_settings = LogSettings::from_env().verbose(cli.verbose > 0);
    if let Err(e) = init_logging(&log_settings).map_err(AgentError::Logging) {
        eprintln!("{e}");
        process::exit(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting door sensor agent"
    );

    match env_file {
        Ok(Some(path)) => info!(path = %path.display(), "Loaded environment file"),
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            process::exit(1);
        }
    }

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(error = %e, fatal = e.is_fatal(), "Command failed");
        process::exit(1);
    }

    info!("Application shutdown complete");
}

async fn run_agent(config: AgentConfig) -> Result<(), AgentError> {
    let sensor = SysfsGpioSensor::open_blocking_task(
        SYSFS_GPIO_ROOT,
        config.device.gpio_pin,
        config.device.gpio_active_low,
    )
    .await?;
    let broker = Arc::new(MqttBroker::new(&config)?);
    let runner = Runner::new(broker, sensor, RunnerSettings::from_config(&config));

    let span = lifecycle_span!(
        client_id = %config.device.client_id,
        gpio_pin = config.device.gpio_pin
    );
    let summary = runner.run(shutdown_signal()).instrument(span).await?;

    info!(
        heartbeat_ticks = summary.heartbeat_ticks,
        connect_attempts = summary.connect_attempts,
        "Agent stopped cleanly"
    );
    Ok(())
}

fn handle_config_command(config: &AgentConfig, show: bool) -> Result<(), AgentError> {
    if show {
        match toml::to_string_pretty(config) {
            Ok(rendered) => {
                println!("Current configuration:");
                println!("{rendered}");
            }
            Err(e) => warn!(error = %e, "Failed to render configuration"),
        }
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let sigint = signal::unix::signal(signal::unix::SignalKind::interrupt());
    let sigterm = signal::unix::signal(signal::unix::SignalKind::terminate());

    match (sigint, sigterm) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Signal handlers unavailable, falling back to ctrl-c");
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    }
}
