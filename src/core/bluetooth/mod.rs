//! Bluetooth functionality for the sensor bridge
//! This module handles discovering the target sensors, keeping a connection
//! to each of them and routing their notifications into the metrics state.

mod central;
mod connection;
mod constants;
mod manager;
mod notification;
mod scanner;
mod session;
mod types;

// Re-export types that should be publicly accessible
pub use central::{Central, Link};
pub use connection::{BluestCentral, BluestLink};
pub use constants::*; // Re-export all constants
pub use manager::{build_target, BluetoothManager};
pub use notification::{
    forward_notifications, handler_for, CadenceHandler, CharacteristicHandler, CyclingPowerHandler,
    HeartRateHandler,
};
pub use scanner::{BluetoothScanner, HandoffReceiver, HandoffSender, ScanTimings};
pub use session::{DeviceSession, SessionTimings};
pub use types::{
    extract_mac_address, normalize_address, CharacteristicKind, DiscoveredDevice, SessionState,
    Subscription, TargetDevice,
};
