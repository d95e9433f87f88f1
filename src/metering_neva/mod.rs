use crate::config::{Config, SerialConfig};
use crate::mqtt::ha_interface::{HaComponent, HaDiscover};
use crate::mqtt::{state_topic, MeteringData, Transmission};
use log::{debug, error, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Sender;

pub mod codec;
pub mod commands;
pub mod decoder;
pub mod frame;
pub mod session;
pub mod structs;
pub mod transport;

use commands::Command;
use session::SessionSettings;
use structs::{DeviceType, ReadingsSnapshot};
use transport::SerialTransport;

/// Device id used for discovery and component ids
pub const DEVICE_ID: &str = "neva_mt124";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NevaError {
    #[error("No answer to {0}")]
    Timeout(Command),
    #[error("Incomplete answer to {0}")]
    Incomplete(Command),
    #[error("Checksum mismatch in answer to {0}")]
    ChecksumMismatch(Command),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Meter did not identify as a known MT124 variant")]
    DeviceUnknown,
    #[error("{0} is not allowed in the current session state")]
    OutOfSequence(Command),
    #[error("Serial port error: {0}")]
    Transport(String),
}

pub struct NevaManager {
    sender: Sender<Transmission>,
    serial: SerialConfig,
    topic_prefix: String,
    ha_enabled: bool,
    discovered: bool,
}

/// Home Assistant device description matching the keys of [`ReadingsSnapshot::to_values`]
pub fn build_discovery(device_type: DeviceType, topic_prefix: &str) -> HaDiscover {
    let mut discover = HaDiscover::new(DEVICE_ID, "Neva MT124", "Neva", device_type.model(), state_topic(topic_prefix));

    discover.add("total_energy", HaComponent::new_energy(DEVICE_ID, "Total Energy", "total_energy"));
    for i in 1..=4 {
        let key = format!("tariff{i}");
        discover.add(&key, HaComponent::new_energy(DEVICE_ID, &format!("Tariff {i} Energy"), &key));
    }
    discover.add("power", HaComponent::new_power(DEVICE_ID, "Active Power", "power"));
    discover.add("voltage", HaComponent::new_voltage(DEVICE_ID, "Voltage", "voltage"));
    discover.add("current", HaComponent::new_current(DEVICE_ID, "Current", "current"));
    discover.add("battery", HaComponent::new_percent(DEVICE_ID, "battery", "Battery", "battery"));
    discover.add("serial", HaComponent::new_text(DEVICE_ID, "Serial Number", "serial"));

    discover
}

fn poll_once(serial: &SerialConfig) -> Result<ReadingsSnapshot, NevaError> {
    let transport = SerialTransport::open(
        &serial.port,
        serial.initial_baudrate,
        Duration::from_millis(serial.data_timeout_ms),
    )?;
    session::poll_meter(transport, SessionSettings::from(serial))
}

impl NevaManager {
    pub fn new(sender: Sender<Transmission>, config: &Config) -> Self {
        Self {
            sender,
            serial: config.serial.clone(),
            topic_prefix: config.mqtt.topic_prefix.clone(),
            ha_enabled: config.mqtt.ha_enabled,
            discovered: false,
        }
    }

    /// Turns a finished poll into the transmissions for the MQTT side
    fn handle_snapshot(&mut self, snapshot: &ReadingsSnapshot) -> Vec<Transmission> {
        let mut out = Vec::new();

        if self.ha_enabled && !self.discovered {
            out.push(Transmission::AutoDiscovery(build_discovery(snapshot.device_type, &self.topic_prefix)));
            self.discovered = true;
        }

        if snapshot.is_empty() {
            warn!("Meter session succeeded but no value could be read");
        } else {
            out.push(Transmission::Metering(MeteringData::from_snapshot(DEVICE_ID, snapshot)));
        }

        out
    }

    pub async fn start_thread(&mut self) {
        info!("Starting Neva MT124 thread on {}", self.serial.port);

        loop {
            let serial = self.serial.clone();
            let outcome = tokio::task::spawn_blocking(move || poll_once(&serial)).await;

            match outcome {
                Ok(Ok(snapshot)) => {
                    debug!("Poll finished: {:?}", snapshot);
                    for transmission in self.handle_snapshot(&snapshot) {
                        if self.sender.send(transmission).await.is_err() {
                            error!("MQTT side is gone, stopping Neva thread");
                            return;
                        }
                    }
                },
                Ok(Err(e @ NevaError::DeviceUnknown)) | Ok(Err(e @ NevaError::Timeout(_))) => {
                    info!("Meter unreachable: {}", e);
                },
                Ok(Err(e @ NevaError::Transport(_))) => {
                    error!("{}", e);
                },
                Ok(Err(e)) => {
                    warn!("Poll failed: {}", e);
                },
                Err(e) => {
                    error!("Poll task failed: {}", e);
                }
            }

            tokio::time::sleep(Duration::from_secs(self.serial.interval_seconds)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use structs::ScaledValue;

    fn config() -> Config {
        Config::from_yaml_str("serial:\n  port: /dev/null\nmqtt:\n  host: localhost\n  topic_prefix: neva\n").unwrap()
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(NevaError::Timeout(Command::SerialNumber).to_string(), format!("No answer to {}", Command::SerialNumber));
        assert_eq!(NevaError::InvalidFormat("x".to_string()).to_string(), "Invalid format: x");
    }

    #[test]
    fn test_build_discovery() {
        let discover = build_discovery(DeviceType::Type6102, "neva");
        assert_eq!(discover.discover_topic, "homeassistant/device/neva_mt124/config");
        assert_eq!(discover.state_topic, "neva/state");
        assert_eq!(discover.cmps.len(), 10);

        let value = serde_json::to_value(&discover).unwrap();
        assert_eq!(value["dev"]["model"], "MT124-6102");
        assert_eq!(value["dev"]["manufacturer"], "Neva");
        assert_eq!(value["cmps"]["tariff3"]["state_class"], "total_increasing");
        assert_eq!(value["cmps"]["battery"]["unit_of_measurement"], "%");
        assert_eq!(value["cmps"]["current"]["unit_of_measurement"], "A");
    }

    #[tokio::test]
    async fn test_discovery_sent_once() {
        let (tx, _rx) = tokio::sync::mpsc::channel(10);
        let mut manager = NevaManager::new(tx, &config());

        let mut snapshot = ReadingsSnapshot::new(DeviceType::Type7109);
        snapshot.voltage = Some(ScaledValue::new(2301, 10));

        let first = manager.handle_snapshot(&snapshot);
        assert_eq!(first.len(), 2);
        assert!(matches!(first[0], Transmission::AutoDiscovery(_)));
        assert!(matches!(first[1], Transmission::Metering(_)));

        let second = manager.handle_snapshot(&snapshot);
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], Transmission::Metering(_)));
    }

    #[tokio::test]
    async fn test_empty_snapshot_not_published() {
        let (tx, _rx) = tokio::sync::mpsc::channel(10);
        let mut c = config();
        c.mqtt.ha_enabled = false;
        let mut manager = NevaManager::new(tx, &c);

        let out = manager.handle_snapshot(&ReadingsSnapshot::new(DeviceType::Type6102));
        assert!(out.is_empty());
    }
}
