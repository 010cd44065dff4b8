//! Error types
//! Typed errors for configuration and device sessions. I/O paths use
//! `anyhow::Result` and wrap these where they occur.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::Metric;

pub use crate::core::decoder::DecodeError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no target devices configured")]
    NoDevices,
    #[error("device {name:?} has an invalid address {address:?}")]
    InvalidAddress { name: String, address: String },
    #[error("address {0} is configured more than once")]
    DuplicateAddress(String),
    #[error("device {0:?} has no characteristics to subscribe to")]
    NoCharacteristics(String),
    #[error("{metric} is produced by both {first:?} and {second:?}")]
    DuplicateOwner {
        metric: Metric,
        first: String,
        second: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connecting to {device} timed out after {timeout:?}")]
    ConnectTimeout { device: String, timeout: Duration },
    #[error("subscribing to {characteristic} on {device} timed out after {timeout:?}")]
    SubscribeTimeout {
        device: String,
        characteristic: String,
        timeout: Duration,
    },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("metrics endpoint responded with {0}")]
    Status(reqwest::StatusCode),
    #[error("metrics request failed: {0}")]
    Request(#[from] reqwest::Error),
}
