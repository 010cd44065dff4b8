//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_CSC_MEASUREMENT, UUID_CYCLING_POWER_MEASUREMENT, UUID_HEART_RATE_MEASUREMENT,
};
use crate::core::bluetooth::notification::CharacteristicHandler;
use crate::state::Metric;

static MAC_ADDRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").ok());

/// Extracts a MAC address from a platform device id and normalises it to
/// upper-case colon form. BlueZ ids look like `/org/bluez/hci0/dev_B8_27_EB_95_0B_90`.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    MAC_ADDRESS
        .as_ref()?
        .find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace(['_', '-'], ":").to_uppercase())
}

/// Normalises a configured address; `None` unless the whole string is a MAC address.
pub fn normalize_address(address: &str) -> Option<String> {
    let address = address.trim();
    let normalized = extract_mac_address(address)?;
    (normalized.len() == address.len()).then_some(normalized)
}

/// A characteristic the bridge knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicKind {
    /// Heart Rate Measurement (0x2A37)
    HeartRate,
    /// Cycling Power Measurement (0x2A63)
    CyclingPower,
    /// CSC Measurement (0x2A5B), used for crank cadence
    #[serde(rename = "cycling_cadence")]
    CscMeasurement,
}

impl CharacteristicKind {
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::HeartRate => UUID_HEART_RATE_MEASUREMENT,
            Self::CyclingPower => UUID_CYCLING_POWER_MEASUREMENT,
            Self::CscMeasurement => UUID_CSC_MEASUREMENT,
        }
    }

    /// The metric whose value this characteristic produces.
    pub fn metric(&self) -> Metric {
        match self {
            Self::HeartRate => Metric::HeartRate,
            Self::CyclingPower => Metric::Power,
            Self::CscMeasurement => Metric::Cadence,
        }
    }

    /// Short 16-bit assigned number, used in log lines.
    pub fn short_id(&self) -> u16 {
        match self {
            Self::HeartRate => 0x2A37,
            Self::CyclingPower => 0x2A63,
            Self::CscMeasurement => 0x2A5B,
        }
    }
}

impl fmt::Display for CharacteristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.short_id())
    }
}

/// A device seen by a discovery scan, carrying the platform handle needed
/// to connect to it.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice<D> {
    /// Upper-case colon-separated MAC address
    pub address: String,
    /// Advertised name, if any
    pub name: Option<String>,
    pub device: D,
}

/// One characteristic to subscribe to and the handler its notifications go to.
#[derive(Clone)]
pub struct Subscription {
    pub characteristic: Uuid,
    pub label: String,
    pub handler: Arc<dyn CharacteristicHandler>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("characteristic", &self.characteristic)
            .field("label", &self.label)
            .finish()
    }
}

/// A sensor the bridge maintains a connection to. Immutable once built.
#[derive(Debug, Clone)]
pub struct TargetDevice {
    pub name: String,
    pub address: String,
    pub subscriptions: Vec<Subscription>,
    /// Metrics zeroed when this device disconnects.
    pub owned_metrics: Vec<Metric>,
}

/// States of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the scanner to hand over a discovered device
    Idle,
    Connecting,
    Subscribing,
    /// Connected; polling link liveness
    Monitoring,
    /// Link lost; metrics reset, about to return to `Idle`
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Subscribing => write!(f, "subscribing"),
            SessionState::Monitoring => write!(f, "monitoring"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}
