//! Shared metrics state
//! The one record shared by every concurrent loop: latest decoded metric
//! values, per-device connection flags and the cadence computation memory.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::core::decoder::{CadenceTracker, DecodeError};

/// A published metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Power,
    HeartRate,
    Cadence,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Power => write!(f, "power"),
            Metric::HeartRate => write!(f, "heart rate"),
            Metric::Cadence => write!(f, "cadence"),
        }
    }
}

/// Connection status of one target device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub name: String,
    pub address: String,
    pub connected: bool,
    /// Metrics this device produces and resets on disconnect.
    pub owns: Vec<Metric>,
}

/// Consistent copy of the whole state, taken under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Watts.
    pub power: u32,
    /// Beats per minute.
    pub heart_rate: u32,
    /// Crank revolutions per minute.
    pub cadence: u32,
    pub devices: Vec<DeviceStatus>,
}

/// Body of the metrics POST.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadence: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr: Option<u32>,
}

impl MetricsSnapshot {
    /// Whether the device owning `metric` is currently connected.
    pub fn is_live(&self, metric: Metric) -> bool {
        self.devices
            .iter()
            .any(|device| device.connected && device.owns.contains(&metric))
    }

    /// Builds the publish payload; a metric is present only while its
    /// owning device is connected.
    pub fn payload(&self) -> MetricsPayload {
        MetricsPayload {
            power: self.is_live(Metric::Power).then_some(self.power),
            cadence: self.is_live(Metric::Cadence).then_some(self.cadence),
            hr: self.is_live(Metric::HeartRate).then_some(self.heart_rate),
        }
    }

    pub fn device(&self, address: &str) -> Option<&DeviceStatus> {
        self.devices.iter().find(|device| device.address == address)
    }
}

#[derive(Debug, Default)]
struct SensorState {
    power: u32,
    heart_rate: u32,
    cadence: u32,
    devices: Vec<DeviceStatus>,
    cadence_tracker: CadenceTracker,
}

/// Cloneable handle to the shared metrics record.
///
/// Every read and write goes through one mutex. Writes are single-field
/// assignments (the cadence pair is updated together with the cadence value
/// inside one critical section), so a poisoned lock still holds a coherent
/// record and is recovered rather than propagated.
#[derive(Debug, Clone, Default)]
pub struct SharedMetrics {
    inner: Arc<Mutex<SensorState>>,
}

impl SharedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SensorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a target device, initially disconnected.
    pub fn register_device(&self, name: &str, address: &str, owns: &[Metric]) {
        let mut state = self.lock();
        if state.devices.iter().any(|device| device.address == address) {
            return;
        }
        state.devices.push(DeviceStatus {
            name: name.to_string(),
            address: address.to_string(),
            connected: false,
            owns: owns.to_vec(),
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        MetricsSnapshot {
            power: state.power,
            heart_rate: state.heart_rate,
            cadence: state.cadence,
            devices: state.devices.clone(),
        }
    }

    pub fn set_power(&self, watts: u32) {
        self.lock().power = watts;
    }

    pub fn set_heart_rate(&self, bpm: u32) {
        self.lock().heart_rate = bpm;
    }

    pub fn set_cadence(&self, rpm: u32) {
        self.lock().cadence = rpm;
    }

    /// Feeds a CSC Measurement payload through the cadence memory and stores
    /// the resulting cadence, if any.
    pub fn apply_crank_measurement(&self, data: &[u8]) -> Result<Option<u32>, DecodeError> {
        let mut state = self.lock();
        let cadence = state.cadence_tracker.decode(data)?;
        if let Some(rpm) = cadence {
            state.cadence = rpm;
        }
        Ok(cadence)
    }

    pub fn cadence_tracker(&self) -> CadenceTracker {
        self.lock().cadence_tracker
    }

    pub fn set_connected(&self, address: &str, connected: bool) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.address == address) {
            device.connected = connected;
        }
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.lock()
            .devices
            .iter()
            .any(|device| device.address == address && device.connected)
    }

    /// Zeroes the given metrics. Resetting cadence also clears the cadence
    /// memory so the next crank sample only primes it.
    pub fn reset(&self, metrics: &[Metric]) {
        let mut state = self.lock();
        for metric in metrics {
            match metric {
                Metric::Power => state.power = 0,
                Metric::HeartRate => state.heart_rate = 0,
                Metric::Cadence => {
                    state.cadence = 0;
                    state.cadence_tracker.reset();
                }
            }
        }
    }
}
