//! Per-device connection lifecycle
//! A session waits for its device to be discovered, connects, subscribes to
//! the device's characteristics, watches the link and starts over when it
//! drops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::central::{Central, Link};
use crate::core::bluetooth::scanner::HandoffReceiver;
use crate::core::bluetooth::types::{DiscoveredDevice, SessionState, TargetDevice};
use crate::error::SessionError;
use crate::state::SharedMetrics;

/// Timing of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Backoff after a failed connect, before waiting for a fresh discovery
    pub reconnect_delay: Duration,
    /// Interval between link liveness checks
    pub liveness_poll: Duration,
    /// Bound on one connect attempt and on each subscribe attempt
    pub connect_timeout: Duration,
}

enum MonitorOutcome {
    LinkLost,
    Shutdown,
}

/// Connection state machine for one target device.
pub struct DeviceSession<C: Central> {
    central: Arc<C>,
    target: TargetDevice,
    metrics: SharedMetrics,
    handoff: HandoffReceiver<C::Device>,
    timings: SessionTimings,
    state: watch::Sender<SessionState>,
}

impl<C: Central> DeviceSession<C> {
    pub fn new(
        central: Arc<C>,
        target: TargetDevice,
        metrics: SharedMetrics,
        handoff: HandoffReceiver<C::Device>,
        timings: SessionTimings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            central,
            target,
            metrics,
            handoff,
            timings,
            state,
        }
    }

    /// Observes the session's state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SessionState) {
        debug!("{}: {} -> {}", self.target.name, *self.state.borrow(), next);
        self.state.send_replace(next);
    }

    /// Runs the state machine until `cancel` fires or the scanner goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Session for {} ({}) started", self.target.name, self.target.address);

        loop {
            self.transition(SessionState::Idle);
            let Some(next) = cancel.run_until_cancelled(self.handoff.recv()).await else {
                break;
            };
            let Some(discovered) = next else {
                warn!("{}: discovery queue closed", self.target.name);
                break;
            };
            info!("Found {}", self.target.name);

            self.transition(SessionState::Connecting);
            let Some(connected) = cancel.run_until_cancelled(self.connect(&discovered)).await else {
                break;
            };
            let link = match connected {
                Ok(link) => link,
                Err(e) => {
                    error!("Failed to connect to {}: {:#}", self.target.name, e);
                    self.discard_stale_handoffs();
                    if cancel
                        .run_until_cancelled(tokio::time::sleep(self.timings.reconnect_delay))
                        .await
                        .is_none()
                    {
                        break;
                    }
                    continue;
                }
            };
            info!("Connected to {}", self.target.name);

            self.transition(SessionState::Subscribing);
            if cancel.run_until_cancelled(self.subscribe_all(&link)).await.is_none() {
                self.shutdown_link(link).await;
                break;
            }

            self.metrics.set_connected(&self.target.address, true);
            self.transition(SessionState::Monitoring);

            match self.monitor(&link, &cancel).await {
                MonitorOutcome::LinkLost => {
                    info!("{} disconnected", self.target.name);
                    self.transition(SessionState::Disconnected);
                    self.mark_disconnected();
                    self.discard_stale_handoffs();
                }
                MonitorOutcome::Shutdown => {
                    self.shutdown_link(link).await;
                    break;
                }
            }
        }

        info!("Session for {} stopped", self.target.name);
    }

    async fn connect(&self, discovered: &DiscoveredDevice<C::Device>) -> Result<C::Link> {
        info!("Connecting to {}...", self.target.name);
        let timeout = self.timings.connect_timeout;
        let link = tokio::time::timeout(timeout, self.central.connect(discovered))
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                device: self.target.name.clone(),
                timeout,
            })??;
        Ok(link)
    }

    /// Subscribes to every characteristic of the target. A failed
    /// subscription is logged and skipped.
    async fn subscribe_all(&self, link: &C::Link) -> usize {
        let timeout = self.timings.connect_timeout;
        let mut subscribed = 0;

        for subscription in &self.target.subscriptions {
            let attempt = link.subscribe(subscription.characteristic, subscription.handler.clone());
            let result = match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::SubscribeTimeout {
                    device: self.target.name.clone(),
                    characteristic: subscription.label.clone(),
                    timeout,
                }
                .into()),
            };

            match result {
                Ok(()) => {
                    info!("Subscribed to {} on {}", subscription.label, self.target.name);
                    subscribed += 1;
                }
                Err(e) => error!(
                    "Failed to subscribe to {} on {}: {:#}",
                    subscription.label, self.target.name, e
                ),
            }
        }

        if subscribed < self.target.subscriptions.len() {
            warn!(
                "{}: {} of {} characteristics subscribed",
                self.target.name,
                subscribed,
                self.target.subscriptions.len()
            );
        }
        subscribed
    }

    async fn monitor(&mut self, link: &C::Link, cancel: &CancellationToken) -> MonitorOutcome {
        loop {
            // A connected device keeps showing up in scans.
            self.discard_stale_handoffs();

            let Some(live) = cancel.run_until_cancelled(link.is_live()).await else {
                return MonitorOutcome::Shutdown;
            };
            match live {
                Ok(true) => {}
                Ok(false) => return MonitorOutcome::LinkLost,
                Err(e) => {
                    error!("{} connection error: {:#}", self.target.name, e);
                    return MonitorOutcome::LinkLost;
                }
            }

            if cancel
                .run_until_cancelled(tokio::time::sleep(self.timings.liveness_poll))
                .await
                .is_none()
            {
                return MonitorOutcome::Shutdown;
            }
        }
    }

    /// Drops every queued discovery. Only a discovery made after the current
    /// link went away may start a new connect attempt.
    fn discard_stale_handoffs(&mut self) -> usize {
        let mut discarded = 0;
        while self.handoff.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("{}: discarded {} stale discovery event(s)", self.target.name, discarded);
        }
        discarded
    }

    /// Clears the connected flag and zeroes the metrics this device owns,
    /// so no stale reading outlives the link.
    fn mark_disconnected(&self) {
        self.metrics.set_connected(&self.target.address, false);
        self.metrics.reset(&self.target.owned_metrics);
    }

    async fn shutdown_link(&self, link: C::Link) {
        if let Err(e) = link.disconnect().await {
            warn!("Failed to disconnect from {}: {:#}", self.target.name, e);
        }
        self.mark_disconnected();
    }
}
