//! Constants used throughout the application
//! This module contains the GATT UUIDs the bridge subscribes to and the
//! default timing values of the discovery and session loops.

use uuid::Uuid;

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const UUID_CYCLING_POWER_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a63_0000_1000_8000_00805f9b34fb);
pub const UUID_CSC_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a5b_0000_1000_8000_00805f9b34fb);

/// Default metrics endpoint
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000/api/metrics";

/// Interval between metric POSTs in milliseconds
pub const DEFAULT_POST_INTERVAL_MS: u64 = 1000;

/// Interval between status log lines in seconds
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;

/// Delay after a failed connect, and before the scanner forgets found devices, in seconds
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 10;

/// Pause between two scans in milliseconds
pub const DEFAULT_SCAN_PAUSE_MS: u64 = 1000;

/// Link liveness poll interval in milliseconds
pub const DEFAULT_LIVENESS_POLL_MS: u64 = 1000;

/// Timeout for a single connect or subscribe attempt in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default trainer: Cycling Power + Speed/Cadence
pub const DEFAULT_TRAINER_NAME: &str = "Gymnasticon";
pub const DEFAULT_TRAINER_ADDRESS: &str = "B8:27:EB:95:0B:90";

/// Default heart rate watch
pub const DEFAULT_WATCH_NAME: &str = "COROS PACE 3";
pub const DEFAULT_WATCH_ADDRESS: &str = "F7:AF:40:38:08:90";
