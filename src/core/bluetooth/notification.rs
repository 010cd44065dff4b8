//! Notification handling for fitness characteristics
//! This module maps characteristic notifications to metric state updates.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};

use crate::core::bluetooth::types::CharacteristicKind;
use crate::core::decoder::{parse_cycling_power, parse_heart_rate};
use crate::state::SharedMetrics;

/// Receives the raw payload of every notification of one subscription.
///
/// Called from the delivery task of the link, so implementations must not
/// block.
pub trait CharacteristicHandler: Send + Sync {
    fn on_notification(&self, device: &str, payload: &[u8]);
}

/// Heart Rate Measurement -> heart rate
pub struct HeartRateHandler {
    metrics: SharedMetrics,
}

impl CharacteristicHandler for HeartRateHandler {
    fn on_notification(&self, device: &str, payload: &[u8]) {
        match parse_heart_rate(payload) {
            Ok(bpm) => {
                debug!("{}: heart rate {} bpm", device, bpm);
                self.metrics.set_heart_rate(u32::from(bpm));
            }
            Err(e) => warn!("{}: skipping heart rate notification {:02X?}: {}", device, payload, e),
        }
    }
}

/// Cycling Power Measurement -> power
pub struct CyclingPowerHandler {
    metrics: SharedMetrics,
}

impl CharacteristicHandler for CyclingPowerHandler {
    fn on_notification(&self, device: &str, payload: &[u8]) {
        match parse_cycling_power(payload) {
            Ok(watts) => {
                debug!("{}: power {} W", device, watts);
                self.metrics.set_power(u32::from(watts));
            }
            Err(e) => warn!("{}: skipping power notification {:02X?}: {}", device, payload, e),
        }
    }
}

/// CSC Measurement -> cadence
pub struct CadenceHandler {
    metrics: SharedMetrics,
}

impl CharacteristicHandler for CadenceHandler {
    fn on_notification(&self, device: &str, payload: &[u8]) {
        match self.metrics.apply_crank_measurement(payload) {
            Ok(Some(rpm)) => debug!("{}: cadence {} rpm", device, rpm),
            Ok(None) => {}
            Err(e) => warn!("{}: skipping CSC notification {:02X?}: {}", device, payload, e),
        }
    }
}

/// Builds the handler that applies `kind` notifications to `metrics`.
pub fn handler_for(kind: CharacteristicKind, metrics: SharedMetrics) -> Arc<dyn CharacteristicHandler> {
    match kind {
        CharacteristicKind::HeartRate => Arc::new(HeartRateHandler { metrics }),
        CharacteristicKind::CyclingPower => Arc::new(CyclingPowerHandler { metrics }),
        CharacteristicKind::CscMeasurement => Arc::new(CadenceHandler { metrics }),
    }
}

/// Forwards every payload of a notification stream to `handler`.
///
/// Returns `Ok(())` when the stream ends and the first delivery error
/// otherwise.
pub async fn forward_notifications<S, E>(
    mut stream: S,
    device: &str,
    characteristic: &str,
    handler: &dyn CharacteristicHandler,
) -> Result<(), E>
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
    E: Display,
{
    debug!("Listening for {} notifications from {}", characteristic, device);
    while let Some(result) = stream.next().await {
        match result {
            Ok(value) => handler.on_notification(device, &value),
            Err(e) => {
                warn!("Error in {} notification stream from {}: {}", characteristic, device, e);
                return Err(e);
            }
        }
    }
    info!("{} notification stream from {} ended", characteristic, device);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Metric;
    use futures_util::stream;

    fn metrics() -> SharedMetrics {
        let metrics = SharedMetrics::new();
        metrics.register_device("trainer", "B8:27:EB:95:0B:90", &[Metric::Power, Metric::Cadence]);
        metrics.register_device("watch", "F7:AF:40:38:08:90", &[Metric::HeartRate]);
        metrics
    }

    #[test]
    fn handlers_write_their_metric() {
        let metrics = metrics();
        handler_for(CharacteristicKind::HeartRate, metrics.clone()).on_notification("watch", &[0x00, 64]);
        handler_for(CharacteristicKind::CyclingPower, metrics.clone())
            .on_notification("trainer", &[0x00, 0x00, 0xC8, 0x00]);

        let cadence = handler_for(CharacteristicKind::CscMeasurement, metrics.clone());
        cadence.on_notification("trainer", &[0x02, 100, 0, 0x00, 0x04]);
        cadence.on_notification("trainer", &[0x02, 110, 0, 0x00, 0x08]);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.heart_rate, 64);
        assert_eq!(snapshot.power, 200);
        assert_eq!(snapshot.cadence, 600);
    }

    #[test]
    fn malformed_payloads_leave_state_unchanged() {
        let metrics = metrics();
        metrics.set_heart_rate(70);
        metrics.set_power(180);
        metrics.set_cadence(88);

        handler_for(CharacteristicKind::HeartRate, metrics.clone()).on_notification("watch", &[0x01, 0x10]);
        handler_for(CharacteristicKind::CyclingPower, metrics.clone()).on_notification("trainer", &[0x00]);
        handler_for(CharacteristicKind::CscMeasurement, metrics.clone()).on_notification("trainer", &[]);

        let snapshot = metrics.snapshot();
        assert_eq!((snapshot.heart_rate, snapshot.power, snapshot.cadence), (70, 180, 88));
    }

    #[tokio::test]
    async fn forwards_until_stream_ends() {
        let metrics = metrics();
        let handler = handler_for(CharacteristicKind::HeartRate, metrics.clone());
        let payloads: Vec<Result<Vec<u8>, String>> = vec![Ok(vec![0x00, 90]), Ok(vec![0x00, 95])];

        let result = forward_notifications(stream::iter(payloads), "watch", "0x2A37", handler.as_ref()).await;
        assert!(result.is_ok());
        assert_eq!(metrics.snapshot().heart_rate, 95);
    }

    #[tokio::test]
    async fn stops_at_first_delivery_error() {
        let metrics = metrics();
        let handler = handler_for(CharacteristicKind::HeartRate, metrics.clone());
        let payloads: Vec<Result<Vec<u8>, String>> =
            vec![Ok(vec![0x00, 90]), Err("link lost".to_string()), Ok(vec![0x00, 120])];

        let result = forward_notifications(stream::iter(payloads), "watch", "0x2A37", handler.as_ref()).await;
        assert_eq!(result, Err("link lost".to_string()));
        assert_eq!(metrics.snapshot().heart_rate, 90);
    }
}
