pub mod bridge_config;

pub use bridge_config::{BridgeConfig, DeviceConfig, CONFIG_FILE_NAME};
