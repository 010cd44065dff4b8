//! BLE central-role capability consumed by the scanner and the device sessions.
//! The production implementation lives in `connection`; tests plug in fakes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::core::bluetooth::notification::CharacteristicHandler;
use crate::core::bluetooth::types::DiscoveredDevice;

/// Discovery and connection.
#[async_trait::async_trait]
pub trait Central: Send + Sync + 'static {
    /// Platform device handle handed from the scanner to a session.
    type Device: Clone + Send + Sync + 'static;
    /// A live connection to one device.
    type Link: Link;

    /// Runs one discovery scan for `timeout` and returns every device seen.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice<Self::Device>>>;

    /// Establishes a link to a discovered device.
    async fn connect(&self, device: &DiscoveredDevice<Self::Device>) -> Result<Self::Link>;
}

/// One live connection. Dropping the link stops notification delivery.
#[async_trait::async_trait]
pub trait Link: Send + Sync + 'static {
    /// Registers `handler` for notifications of `characteristic`.
    async fn subscribe(&self, characteristic: Uuid, handler: Arc<dyn CharacteristicHandler>) -> Result<()>;

    /// Whether the link is still usable.
    async fn is_live(&self) -> Result<bool>;

    /// Tears the connection down.
    async fn disconnect(&self) -> Result<()>;
}
