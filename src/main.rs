use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use sensor_bridge_lib::config::{BridgeConfig, CONFIG_FILE_NAME};
use sensor_bridge_lib::core::bluetooth::BluestCentral;
use sensor_bridge_lib::publisher::{run_status_reporter, MetricsPublisher};
use sensor_bridge_lib::{logging, utils, BluetoothManager, SharedMetrics};

async fn run(config: BridgeConfig) -> Result<()> {
    utils::ensure_bluetooth_service()
        .await
        .context("Cannot proceed without Bluetooth service")?;

    let central = BluestCentral::new().await?;
    let metrics = SharedMetrics::new();
    let publisher = MetricsPublisher::new(&config.server_url, config.post_interval(), metrics.clone())?;
    let status_interval = config.status_interval();
    let manager = BluetoothManager::new(central, config, metrics.clone());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutting down...");
        shutdown.cancel();
    });

    let publisher_task = tokio::spawn(publisher.run(cancel.clone()));
    let status_task = tokio::spawn(run_status_reporter(metrics, status_interval, cancel.clone()));
    manager.run(cancel).await;

    let _ = publisher_task.await;
    let _ = status_task.await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    // The log level comes from the config, so the logger starts after loading it.
    let config = BridgeConfig::load(&path).await;
    let level = config.as_ref().map(|c| c.log_level.as_str()).unwrap_or("info");
    if let Err(e) = logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if !path.exists() {
        warn!("Config file not found at {:?}, using defaults", path);
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Sensor bridge starting");
    for device in &config.devices {
        info!("  - {}: {}", device.name, device.address);
    }
    info!("POSTing to: {}", config.server_url);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
