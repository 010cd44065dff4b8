//! Discovery loop for the sensor bridge
//! One scanner serves every target device and hands each discovery to the
//! session that waits for it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::central::Central;
use crate::core::bluetooth::types::DiscoveredDevice;

/// Timing of the discovery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTimings {
    /// Duration of one discovery scan
    pub scan_timeout: Duration,
    /// Pause between two scans
    pub scan_pause: Duration,
    /// Wait before forgetting found devices once every target has been found
    pub recheck_delay: Duration,
}

pub type HandoffSender<D> = mpsc::UnboundedSender<DiscoveredDevice<D>>;
pub type HandoffReceiver<D> = mpsc::UnboundedReceiver<DiscoveredDevice<D>>;

/// One discovery loop serving every target device.
///
/// Each discovered target is handed to its session through a per-address
/// queue, once. When all targets have been handed off the found-set is
/// cleared after `recheck_delay`, so a session that lost its device gets it
/// handed over again.
pub struct BluetoothScanner<C: Central> {
    central: Arc<C>,
    targets: HashMap<String, HandoffSender<C::Device>>,
    timings: ScanTimings,
}

impl<C: Central> BluetoothScanner<C> {
    pub fn new(central: Arc<C>, timings: ScanTimings) -> Self {
        Self {
            central,
            targets: HashMap::new(),
            timings,
        }
    }

    /// Adds a target address and returns the queue its discoveries arrive on.
    pub fn register(&mut self, address: &str) -> HandoffReceiver<C::Device> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.targets.insert(address.to_string(), tx);
        rx
    }

    fn still_needed(&self, found: &HashSet<String>) -> HashSet<String> {
        self.targets
            .keys()
            .filter(|address| !found.contains(*address))
            .cloned()
            .collect()
    }

    fn dispatch(
        &self,
        devices: Vec<DiscoveredDevice<C::Device>>,
        needed: &HashSet<String>,
        found: &mut HashSet<String>,
    ) {
        for device in devices {
            if !needed.contains(&device.address) || !found.insert(device.address.clone()) {
                continue;
            }
            info!("Scanner found {} ({})", device.address, device.name.as_deref().unwrap_or("Unknown"));

            let Some(tx) = self.targets.get(&device.address) else {
                continue;
            };
            if tx.send(device).is_err() {
                warn!("Session for a discovered device has stopped; handoff dropped");
            }
        }
    }

    /// Runs the discovery loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Device scan task started for {} target(s).", self.targets.len());
        let mut found: HashSet<String> = HashSet::new();

        loop {
            let needed = self.still_needed(&found);

            if needed.is_empty() {
                debug!("All targets handed off, rechecking in {:?}", self.timings.recheck_delay);
                if cancel
                    .run_until_cancelled(tokio::time::sleep(self.timings.recheck_delay))
                    .await
                    .is_none()
                {
                    break;
                }
                found.clear();
                continue;
            }

            info!("Scanning for {} device(s)...", needed.len());
            let Some(result) = cancel
                .run_until_cancelled(self.central.scan(self.timings.scan_timeout))
                .await
            else {
                break;
            };
            let devices = match result {
                Ok(devices) => devices,
                Err(e) => {
                    error!("Scan error: {:#}", e);
                    Vec::new()
                }
            };
            debug!("Scan returned {} device(s)", devices.len());
            self.dispatch(devices, &needed, &mut found);

            if cancel
                .run_until_cancelled(tokio::time::sleep(self.timings.scan_pause))
                .await
                .is_none()
            {
                break;
            }
        }

        info!("Device scan task stopped.");
    }
}
