//! BLE fitness sensor bridge library
//! Keeps heart rate, cycling power and cadence sensors connected, decodes
//! their notifications and publishes the latest values.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod publisher;
pub mod state;
pub mod utils;

pub use config::BridgeConfig;
pub use core::BluetoothManager;
pub use state::{MetricsSnapshot, SharedMetrics};
