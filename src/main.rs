//! Smart-home ingestion service - main entry point

use clap::{Parser, Subcommand};
use smarthome_ingest::config::ServiceConfig;
use smarthome_ingest::observability::init_default_logging;
use smarthome_ingest::{Focus, SmartHomeService};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Smart-home MQTT routing and ingestion service
#[derive(Parser)]
#[command(name = "smarthome-ingest")]
#[command(about = "Routes smart-home MQTT traffic into storage and publishes device commands")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SMARTHOME_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and ingest traffic until interrupted
    Run {
        /// User whose home should be followed (overrides [focus] in the config)
        #[arg(long, requires = "home")]
        user: Option<i64>,

        /// Home to follow
        #[arg(long, requires = "user")]
        home: Option<i64>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!(
        "Starting smart-home ingestion service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { user, home } => {
            let focus = user.zip(home).map(|(user_id, home_id)| Focus::new(user_id, home_id));
            run_service(config, focus).await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ServiceConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["smarthome.toml", "config/smarthome.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ServiceConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create smarthome.toml".into())
        }
    }
}

async fn run_service(
    config: ServiceConfig,
    focus: Option<Focus>,
) -> Result<(), Box<dyn std::error::Error>> {
    config.require_password_env()?;
    info!(
        host = %config.mqtt.host,
        port = config.mqtt.port(),
        "Application starting"
    );

    let service = SmartHomeService::start(&config).await?;

    if let Some(focus) = focus {
        if let Err(e) = service.switch_focus(focus).await {
            // Still applied on the next ConnAck when the broker is not reachable yet
            warn!(%focus, error = %e, "Focus from command line not fully applied");
        }
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Service is running and waiting for MQTT traffic...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = service.wait_for_permanent_disconnect() => {
            error!("MQTT connection permanently lost, shutting down...");
        }
    }

    let snapshot = service.metrics();
    service.shutdown().await?;

    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(metrics = %json, "Final ingestion metrics"),
        Err(e) => warn!(error = %e, "Could not serialize final metrics"),
    }
    Ok(())
}

fn handle_config_command(
    config: &ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
