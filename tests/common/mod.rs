//! In-memory BLE central used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use sensor_bridge_lib::config::DeviceConfig;
use sensor_bridge_lib::core::bluetooth::{
    Central, CharacteristicHandler, CharacteristicKind, DiscoveredDevice, HandoffReceiver, Link,
    ScanTimings, SessionTimings,
};

pub const TRAINER: &str = "B8:27:EB:95:0B:90";
pub const WATCH: &str = "F7:AF:40:38:08:90";

pub fn trainer_config() -> DeviceConfig {
    DeviceConfig {
        name: "Gymnasticon".to_string(),
        address: TRAINER.to_string(),
        characteristics: vec![CharacteristicKind::CyclingPower, CharacteristicKind::CscMeasurement],
    }
}

pub fn watch_config() -> DeviceConfig {
    DeviceConfig {
        name: "COROS PACE 3".to_string(),
        address: WATCH.to_string(),
        characteristics: vec![CharacteristicKind::HeartRate],
    }
}

pub fn scan_timings() -> ScanTimings {
    ScanTimings {
        scan_timeout: Duration::from_secs(10),
        scan_pause: Duration::from_secs(1),
        recheck_delay: Duration::from_secs(5),
    }
}

pub fn session_timings() -> SessionTimings {
    SessionTimings {
        reconnect_delay: Duration::from_secs(5),
        liveness_poll: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(15),
    }
}

pub fn power_payload(watts: i16) -> Vec<u8> {
    let mut data = vec![0x00, 0x00];
    data.extend_from_slice(&watts.to_le_bytes());
    data
}

pub fn crank_payload(revs: u16, time: u16) -> Vec<u8> {
    let mut data = vec![0x02];
    data.extend_from_slice(&revs.to_le_bytes());
    data.extend_from_slice(&time.to_le_bytes());
    data
}

/// Platform handle of a fake device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDevice {
    pub address: String,
}

#[derive(Default)]
struct CentralState {
    visible: Vec<String>,
    scans: usize,
    failing_scans: usize,
    connect_attempts: HashMap<String, usize>,
    failing_connects: HashMap<String, usize>,
    hanging_connects: bool,
    failing_subscriptions: HashSet<Uuid>,
    hanging_subscriptions: HashSet<Uuid>,
    links: HashMap<String, Vec<FakeLink>>,
}

/// Scriptable `Central`; clones share state.
#[derive(Clone, Default)]
pub struct FakeCentral {
    state: Arc<Mutex<CentralState>>,
}

impl FakeCentral {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut CentralState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn discovered(address: &str) -> DiscoveredDevice<FakeDevice> {
        DiscoveredDevice {
            address: address.to_string(),
            name: Some(format!("fake {}", address)),
            device: FakeDevice {
                address: address.to_string(),
            },
        }
    }

    /// Devices returned by every following scan.
    pub fn set_visible(&self, addresses: &[&str]) {
        self.with(|s| s.visible = addresses.iter().map(|a| a.to_string()).collect());
    }

    pub fn fail_scans(&self, count: usize) {
        self.with(|s| s.failing_scans = count);
    }

    pub fn fail_connects(&self, address: &str, count: usize) {
        self.with(|s| {
            s.failing_connects.insert(address.to_string(), count);
        });
    }

    pub fn hang_connects(&self, hang: bool) {
        self.with(|s| s.hanging_connects = hang);
    }

    pub fn fail_subscriptions(&self, characteristic: Uuid) {
        self.with(|s| {
            s.failing_subscriptions.insert(characteristic);
        });
    }

    /// Subscribing to `characteristic` never completes.
    pub fn hang_subscriptions(&self, characteristic: Uuid) {
        self.with(|s| {
            s.hanging_subscriptions.insert(characteristic);
        });
    }

    pub fn scans(&self) -> usize {
        self.with(|s| s.scans)
    }

    pub fn connect_attempts(&self, address: &str) -> usize {
        self.with(|s| s.connect_attempts.get(address).copied().unwrap_or(0))
    }

    /// Every link handed out for `address`, oldest first.
    pub fn links(&self, address: &str) -> Vec<FakeLink> {
        self.with(|s| s.links.get(address).cloned().unwrap_or_default())
    }

    pub fn last_link(&self, address: &str) -> FakeLink {
        self.links(address).pop().expect("no link for address")
    }
}

#[async_trait::async_trait]
impl Central for FakeCentral {
    type Device = FakeDevice;
    type Link = FakeLink;

    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice<FakeDevice>>> {
        let fail = self.with(|s| {
            s.scans += 1;
            if s.failing_scans > 0 {
                s.failing_scans -= 1;
                true
            } else {
                false
            }
        });
        if fail {
            bail!("adapter busy");
        }

        tokio::time::sleep(timeout).await;
        Ok(self.with(|s| s.visible.iter().map(|a| Self::discovered(a)).collect()))
    }

    async fn connect(&self, device: &DiscoveredDevice<FakeDevice>) -> Result<FakeLink> {
        let (fail, hang) = self.with(|s| {
            *s.connect_attempts.entry(device.address.clone()).or_default() += 1;
            let fail = match s.failing_connects.get_mut(&device.address) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (fail, s.hanging_connects)
        });
        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            bail!("connection refused by {}", device.address);
        }

        let (failing, hanging) = self.with(|s| (s.failing_subscriptions.clone(), s.hanging_subscriptions.clone()));
        let link = FakeLink::new(&device.device.address, failing, hanging);
        self.with(|s| s.links.entry(device.address.clone()).or_default().push(link.clone()));
        Ok(link)
    }
}

struct LinkState {
    address: String,
    live: AtomicBool,
    poll_error: AtomicBool,
    disconnects: AtomicUsize,
    failing_subscriptions: HashSet<Uuid>,
    hanging_subscriptions: HashSet<Uuid>,
    handlers: Mutex<Vec<(Uuid, Arc<dyn CharacteristicHandler>)>>,
}

/// Fake link; the test drives notifications and liveness.
#[derive(Clone)]
pub struct FakeLink {
    state: Arc<LinkState>,
}

impl FakeLink {
    fn new(address: &str, failing_subscriptions: HashSet<Uuid>, hanging_subscriptions: HashSet<Uuid>) -> Self {
        Self {
            state: Arc::new(LinkState {
                address: address.to_string(),
                live: AtomicBool::new(true),
                poll_error: AtomicBool::new(false),
                disconnects: AtomicUsize::new(0),
                failing_subscriptions,
                hanging_subscriptions,
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Delivers a notification to every handler subscribed to `characteristic`.
    pub fn notify(&self, characteristic: Uuid, payload: &[u8]) {
        let handlers = self.state.handlers.lock().unwrap().clone();
        for (uuid, handler) in handlers {
            if uuid == characteristic {
                handler.on_notification(&self.state.address, payload);
            }
        }
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.state.handlers.lock().unwrap().iter().map(|(uuid, _)| *uuid).collect()
    }

    pub fn drop_connection(&self) {
        self.state.live.store(false, Ordering::SeqCst);
    }

    pub fn fail_polls(&self) {
        self.state.poll_error.store(true, Ordering::SeqCst);
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Link for FakeLink {
    async fn subscribe(&self, characteristic: Uuid, handler: Arc<dyn CharacteristicHandler>) -> Result<()> {
        if self.state.failing_subscriptions.contains(&characteristic) {
            return Err(anyhow!("characteristic {} not found", characteristic));
        }
        if self.state.hanging_subscriptions.contains(&characteristic) {
            std::future::pending::<()>().await;
        }
        self.state.handlers.lock().unwrap().push((characteristic, handler));
        Ok(())
    }

    async fn is_live(&self) -> Result<bool> {
        if self.state.poll_error.load(Ordering::SeqCst) {
            bail!("org.bluez.Error.Failed");
        }
        Ok(self.state.live.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Drains a handoff queue and returns how many events were waiting.
pub fn drain<D>(rx: &mut HandoffReceiver<D>) -> usize {
    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    count
}

pub fn handoff_channel() -> (mpsc::UnboundedSender<DiscoveredDevice<FakeDevice>>, HandoffReceiver<FakeDevice>) {
    mpsc::unbounded_channel()
}
