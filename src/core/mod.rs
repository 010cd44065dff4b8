//! Core functionality for the sensor bridge
//! This module contains the BLE device lifecycle and the characteristic decoders.

pub mod bluetooth;
pub mod decoder;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use decoder::{CadenceTracker, CrankSample, DecodeError};
