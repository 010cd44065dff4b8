//! Bluetooth manager for the sensor bridge
//! This module wires the scanner and one session per target device together
//! and runs them until shutdown.

use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeConfig, DeviceConfig};
use crate::core::bluetooth::central::Central;
use crate::core::bluetooth::notification::handler_for;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::session::DeviceSession;
use crate::core::bluetooth::types::{Subscription, TargetDevice};
use crate::state::SharedMetrics;

/// Builds the immutable descriptor of one configured device, with handlers
/// bound to `metrics`.
pub fn build_target(device: &DeviceConfig, metrics: &SharedMetrics) -> TargetDevice {
    let subscriptions = device
        .characteristics
        .iter()
        .map(|kind| Subscription {
            characteristic: kind.uuid(),
            label: kind.to_string(),
            handler: handler_for(*kind, metrics.clone()),
        })
        .collect();

    let mut owned_metrics: Vec<_> = device.characteristics.iter().map(|kind| kind.metric()).collect();
    owned_metrics.sort();
    owned_metrics.dedup();

    TargetDevice {
        name: device.name.clone(),
        address: device.address.clone(),
        subscriptions,
        owned_metrics,
    }
}

/// Owns the discovery loop and the device sessions.
pub struct BluetoothManager<C: Central> {
    central: Arc<C>,
    config: BridgeConfig,
    metrics: SharedMetrics,
    targets: Vec<TargetDevice>,
}

impl<C: Central> BluetoothManager<C> {
    /// Creates a manager for the devices in `config` and registers them in
    /// `metrics`. `config` is expected to be validated.
    pub fn new(central: C, config: BridgeConfig, metrics: SharedMetrics) -> Self {
        let targets: Vec<TargetDevice> = config
            .devices
            .iter()
            .map(|device| build_target(device, &metrics))
            .collect();

        for target in &targets {
            metrics.register_device(&target.name, &target.address, &target.owned_metrics);
        }

        Self {
            central: Arc::new(central),
            config,
            metrics,
            targets,
        }
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    pub fn targets(&self) -> &[TargetDevice] {
        &self.targets
    }

    /// Spawns the scanner and every session, then waits for all of them to
    /// stop after `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut scanner = BluetoothScanner::new(self.central.clone(), self.config.scan_timings());
        let mut tasks = JoinSet::new();

        for target in self.targets {
            info!("Target device: {} ({})", target.name, target.address);
            let handoff = scanner.register(&target.address);
            let session = DeviceSession::new(
                self.central.clone(),
                target,
                self.metrics.clone(),
                handoff,
                self.config.session_timings(),
            );
            tasks.spawn(session.run(cancel.clone()));
        }
        tasks.spawn(scanner.run(cancel.clone()));

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Bluetooth task failed: {}", e);
            }
        }
        info!("Bluetooth manager stopped.");
    }
}
