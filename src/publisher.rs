//! Metrics publishing
//! Periodically POSTs the current metrics to the configured endpoint and logs
//! a status line. Neither loop writes to the metrics state.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::PublishError;
use crate::state::{MetricsSnapshot, SharedMetrics};

/// POSTs a metrics payload on a fixed interval.
pub struct MetricsPublisher {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    metrics: SharedMetrics,
}

impl MetricsPublisher {
    pub fn new(url: &str, interval: Duration, metrics: SharedMetrics) -> Result<Self, PublishError> {
        // The endpoint is local; never route it through a proxy.
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(interval.max(Duration::from_secs(1)))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            interval,
            metrics,
        })
    }

    /// Sends the current snapshot once.
    pub async fn publish_once(&self) -> Result<(), PublishError> {
        let payload = self.metrics.snapshot().payload();
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status(status));
        }
        Ok(())
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("POSTing metrics to {} every {:?}", self.url, self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while cancel.run_until_cancelled(ticker.tick()).await.is_some() {
            match self.publish_once().await {
                Ok(()) => {}
                Err(PublishError::Status(status)) => warn!("Failed to POST metrics: {}", status),
                // The server may simply not be running.
                Err(e) => debug!("{}", e),
            }
        }
        info!("Metrics publisher stopped");
    }
}

fn connection_label(connected: bool) -> &'static str {
    if connected { "connected" } else { "disconnected" }
}

/// Formats the periodic status line.
pub fn status_line(snapshot: &MetricsSnapshot, elapsed: Duration) -> String {
    let mut line = format!(
        "[{}s] Power: {}W | HR: {}bpm | Cadence: {}rpm",
        elapsed.as_secs(),
        snapshot.power,
        snapshot.heart_rate,
        snapshot.cadence
    );
    for device in &snapshot.devices {
        line.push_str(&format!(" | {}: {}", device.name, connection_label(device.connected)));
    }
    line
}

/// Logs the status line every `interval` until cancelled.
pub async fn run_status_reporter(metrics: SharedMetrics, interval: Duration, cancel: CancellationToken) {
    let started = Instant::now();
    loop {
        if cancel
            .run_until_cancelled(tokio::time::sleep(interval))
            .await
            .is_none()
        {
            break;
        }
        info!("{}", status_line(&metrics.snapshot(), started.elapsed()));
    }
}
