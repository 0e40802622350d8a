//! ESP MQTT Bridge - Main Entry Point
//!
//! With no arguments the bridge reads its settings from the environment
//! (and `.env`) and runs until SIGINT/SIGTERM or until the broker
//! connection is permanently lost.

use clap::{Parser, Subcommand};
use esp_mqtt_bridge::bridge::{Bridge, BridgeSettings};
use esp_mqtt_bridge::config::{BridgeConfig, StoreSection};
use esp_mqtt_bridge::error::BridgeError;
use esp_mqtt_bridge::observability::init_default_logging;
use esp_mqtt_bridge::store::{PostgrestConfig, PostgrestStore, Store};
use esp_mqtt_bridge::transport::{mqtt::MqttClient, Transport};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info};

/// Bridge ESP device events from MQTT into Supabase
#[derive(Parser)]
#[command(name = "esp-mqtt-bridge")]
#[command(about = "Bridges ESP device status and RFID task events from MQTT into Supabase")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to environment variables)
    #[arg(short, long, value_name = "FILE", env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Validate configuration
    Config {
        /// Show the resolved configuration (secrets are never printed)
        #[arg(long)]
        show: bool,
    },
    /// Check that the backing store is reachable and exit
    Ping,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting ESP MQTT bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match BridgeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Ping => ping_store(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.operator_message());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Store factory: build the PostgREST client from configuration
fn create_store(section: &StoreSection) -> Result<PostgrestStore, BridgeError> {
    let store_config = PostgrestConfig {
        base_url: section.url.clone(),
        api_key: section.api_key()?,
        schema: section.schema.clone(),
        timeout: section.timeout(),
    };
    Ok(PostgrestStore::new(store_config)?)
}

async fn run_bridge(config: BridgeConfig) -> Result<(), BridgeError> {
    let store = Arc::new(create_store(&config.store)?);
    let transport = MqttClient::new(config.mqtt.clone())?;
    info!(broker = %transport.broker_url(), store = %config.store.url, "Bridge configured");

    let mut bridge = Bridge::new(transport, store, BridgeSettings::from(&config));
    if let Err(e) = bridge.start().await {
        let _ = bridge.shutdown().await;
        return Err(e);
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| BridgeError::internal(format!("Failed to install SIGINT handler: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| BridgeError::internal(format!("Failed to install SIGTERM handler: {e}")))?;

    info!("Bridge is running and waiting for messages on MQTT...");

    let permanently_lost = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        _ = monitor_connection_health(&bridge) => {
            error!("MQTT connection permanently lost, shutting down bridge...");
            true
        }
    };

    bridge.shutdown().await?;

    if permanently_lost {
        return Err(BridgeError::internal("MQTT connection permanently lost"));
    }
    Ok(())
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> Result<(), BridgeError> {
    if show {
        println!("Current configuration:");
        println!("{}", config.describe());
    }

    info!("Configuration validation complete");
    Ok(())
}

async fn ping_store(config: &BridgeConfig) -> Result<(), BridgeError> {
    let store = create_store(&config.store)?;
    store.ping().await?;
    info!(store = %config.store.url, "Backing store reachable");
    Ok(())
}

/// Monitor MQTT connection health and return when permanently disconnected
async fn monitor_connection_health<T, S>(bridge: &Bridge<T, S>)
where
    T: Transport,
    S: Store + 'static,
{
    loop {
        if bridge.is_permanently_disconnected() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
}
