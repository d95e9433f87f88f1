//! Neva MT124 meter reader
//!
//! Talks IEC 61107 mode C to a Neva MT124 over an optical probe and
//! publishes the readings to MQTT with Home Assistant discovery.

pub mod config;
pub mod metering_neva;
pub mod mqtt;

// Re-export common types for easier access
pub use config::Config;
pub use metering_neva::{NevaError, NevaManager};
pub use metering_neva::structs::{DeviceType, ReadingsSnapshot, ScaledValue};
pub use mqtt::{MeteringData, MqttManager};

pub fn get_unix_ts() -> u64 {
    return std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
}

pub fn get_id(protocol: &str, meter_name: &str) -> String {
    return format!("{}-{}-{:?}", protocol, meter_name, get_unix_ts());
}
