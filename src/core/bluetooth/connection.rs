//! Bluetooth connection handling on top of bluest
//! This module implements the `Central` and `Link` capabilities with the
//! platform Bluetooth stack.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::central::{Central, Link};
use crate::core::bluetooth::notification::{forward_notifications, CharacteristicHandler};
use crate::core::bluetooth::types::{extract_mac_address, DiscoveredDevice};

/// The default platform adapter.
#[derive(Clone)]
pub struct BluestCentral {
    adapter: Adapter,
}

impl BluestCentral {
    /// Opens the default adapter and waits until it is powered on.
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self { adapter })
    }

    fn describe(device: Device, advertised_name: Option<String>) -> Option<DiscoveredDevice<Device>> {
        let id = device.id().to_string();
        let Some(address) = extract_mac_address(&id) else {
            debug!("Ignoring device without a MAC address in its id: {}", id);
            return None;
        };
        let name = advertised_name.or_else(|| device.name().ok());
        Some(DiscoveredDevice { address, name, device })
    }
}

#[async_trait::async_trait]
impl Central for BluestCentral {
    type Device = Device;
    type Link = BluestLink;

    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice<Device>>> {
        let mut found: HashMap<String, DiscoveredDevice<Device>> = HashMap::new();

        // Devices the OS already holds a connection to do not advertise.
        for device in self.adapter.connected_devices().await? {
            if let Some(discovered) = Self::describe(device, None) {
                found.insert(discovered.address.clone(), discovered);
            }
        }

        let mut scan_stream = self.adapter.scan(&[]).await?;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(advertising) => {
                            debug!("Found device - Device: {:?}, RSSI: {:?}", advertising.device, advertising.rssi);
                            let name = advertising.adv_data.local_name.clone();
                            if let Some(discovered) = Self::describe(advertising.device, name) {
                                found.entry(discovered.address.clone()).or_insert(discovered);
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = &mut deadline => break,
            }
        }

        Ok(found.into_values().collect())
    }

    async fn connect(&self, discovered: &DiscoveredDevice<Device>) -> Result<BluestLink> {
        let device = discovered.device.clone();
        info!("Device details - ID: {}, Name: {:?}", device.id(), discovered.name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", discovered.address);
            self.adapter.connect_device(&device).await?;
        }

        info!("Connection successful, discovering services...");
        let mut characteristics = Vec::new();
        for service in device.discover_services().await? {
            characteristics.extend(service.discover_characteristics().await?);
        }
        debug!("{} exposes {} characteristics", discovered.address, characteristics.len());

        Ok(BluestLink {
            adapter: self.adapter.clone(),
            device,
            address: discovered.address.clone(),
            characteristics,
            lost: CancellationToken::new(),
            closed: CancellationToken::new(),
        })
    }
}

/// Waits for `notify` and reports the outcome on `ready`.
///
/// Yields the notification stream only while the subscriber is still waiting
/// for it; a subscriber that gave up (timed out) never gets deliveries.
async fn settle_subscription<S, E>(
    notify: impl Future<Output = Result<S, E>>,
    mut ready: oneshot::Sender<Result<(), E>>,
) -> Option<S> {
    let result = tokio::select! {
        result = notify => result,
        _ = ready.closed() => {
            debug!("Subscriber gave up before notifications were enabled");
            return None;
        }
    };

    match result {
        Ok(stream) => ready.send(Ok(())).is_ok().then_some(stream),
        Err(e) => {
            let _ = ready.send(Err(e));
            None
        }
    }
}

/// A connected bluest device and its notification delivery tasks.
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    address: String,
    characteristics: Vec<Characteristic>,
    /// Cancelled by a delivery task when its notification stream fails.
    lost: CancellationToken,
    /// Cancelled when the link is dropped; stops the delivery tasks.
    closed: CancellationToken,
}

impl Drop for BluestLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[async_trait::async_trait]
impl Link for BluestLink {
    async fn subscribe(&self, uuid: Uuid, handler: Arc<dyn CharacteristicHandler>) -> Result<()> {
        let characteristic = self
            .characteristics
            .iter()
            .find(|c| c.uuid() == uuid)
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic not found on {}: {}", self.address, uuid))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let address = self.address.clone();
        let lost = self.lost.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let Some(stream) = settle_subscription(characteristic.notify(), ready_tx).await else {
                return;
            };

            let label = characteristic.uuid().to_string();
            tokio::select! {
                result = forward_notifications(stream, &address, &label, handler.as_ref()) => {
                    if result.is_err() {
                        lost.cancel();
                    }
                }
                _ = closed.cancelled() => {
                    debug!("Stopped {} notifications from {}", label, address);
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| anyhow!("Notification task for {} exited before subscribing", uuid))??;
        Ok(())
    }

    async fn is_live(&self) -> Result<bool> {
        if self.lost.is_cancelled() {
            return Ok(false);
        }
        Ok(self.device.is_connected().await)
    }

    async fn disconnect(&self) -> Result<()> {
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.address);
            self.adapter.disconnect_device(&self.device).await?;
            info!("Successfully disconnected");
        } else {
            warn!("Device {} not connected", self.address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn abandoned_subscription_yields_no_stream() {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let notify = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, String>("stream")
        };

        let settle = tokio::spawn(settle_subscription(notify, ready_tx));
        // The subscriber times out first.
        assert!(tokio::time::timeout(Duration::from_secs(15), ready_rx).await.is_err());
        assert_eq!(settle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn waiting_subscriber_gets_the_stream() {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let stream = settle_subscription(async { Ok::<_, String>("stream") }, ready_tx).await;
        assert_eq!(stream, Some("stream"));
        assert_eq!(ready_rx.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn notify_error_is_reported() {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let stream = settle_subscription(async { Err::<&str, _>("not permitted".to_string()) }, ready_tx).await;
        assert_eq!(stream, None);
        assert_eq!(ready_rx.await.unwrap(), Err("not permitted".to_string()));
    }
}
