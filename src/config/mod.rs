use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Options file written by the Home Assistant supervisor for add-ons
pub const ADDON_OPTIONS_PATH: &str = "/data/options.json";
const CONFIG_PATHS: [&str; 2] = ["config/neva2mqtt.yaml", "neva2mqtt.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read {0}: {1}")]
    Io(String, std::io::Error),
    #[error("Unable to parse config file: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("Unable to parse add-on options: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No configuration found, tried {0}")]
    NotFound(String),
}

fn serial_initial_baudrate_default() -> u32 { return 300 }
fn serial_main_baudrate_default() -> u32 { return 9600 }
fn serial_interval_seconds_default() -> u64 { return 60 }
fn serial_data_timeout_ms_default() -> u64 { return 1000 }
fn serial_handshake_timeout_ms_default() -> u64 { return 3000 }
fn serial_settle_ms_default() -> u64 { return 200 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default="serial_initial_baudrate_default")]
    pub initial_baudrate: u32,
    #[serde(default="serial_main_baudrate_default")]
    pub main_baudrate: u32,
    #[serde(default="serial_interval_seconds_default")]
    pub interval_seconds: u64,
    #[serde(default="serial_data_timeout_ms_default")]
    pub data_timeout_ms: u64,
    #[serde(default="serial_handshake_timeout_ms_default")]
    pub handshake_timeout_ms: u64,
    /// Delay between the baud switch request and our own switch
    #[serde(default="serial_settle_ms_default")]
    pub settle_ms: u64,
}

fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_credential_default() -> String { return "".to_string() }
fn mqtt_ha_enabled_default() -> bool { return true }
fn mqtt_client_name_default() -> String { return "neva2mqtt".to_string() }
fn mqtt_topic_prefix_default() -> String { return "neva_mt124".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default="mqtt_port_default")]
    pub port: u16,
    #[serde(default="mqtt_credential_default")]
    pub user: String,
    #[serde(default="mqtt_credential_default")]
    pub pass: String,
    #[serde(default="mqtt_ha_enabled_default")]
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default="mqtt_topic_prefix_default")]
    pub topic_prefix: String,
}

impl MqttConfig {
    /// Credentials are only used when both parts are set
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.pass.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
}

/// The flat option set of the Home Assistant add-on
#[derive(Deserialize, Debug)]
pub struct AddonOptions {
    pub serial_port: String,
    #[serde(default="serial_initial_baudrate_default")]
    pub initial_baudrate: u32,
    #[serde(default="serial_main_baudrate_default")]
    pub main_baudrate: u32,
    #[serde(default="serial_interval_seconds_default")]
    pub interval_seconds: u64,
    #[serde(default="mqtt_topic_prefix_default")]
    pub mqtt_topic_prefix: String,
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))
}

impl Config {
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(contents)?)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&read_file(path)?)
    }

    /// Add-on mode: the serial side comes from the options file, the broker
    /// from the environment the supervisor sets up.
    pub fn from_addon_options<F>(contents: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let options: AddonOptions = serde_json::from_str(contents)?;

        let port = env("HASSIO_MQTT_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(mqtt_port_default());

        Ok(Config {
            serial: SerialConfig {
                port: options.serial_port,
                initial_baudrate: options.initial_baudrate,
                main_baudrate: options.main_baudrate,
                interval_seconds: options.interval_seconds,
                data_timeout_ms: serial_data_timeout_ms_default(),
                handshake_timeout_ms: serial_handshake_timeout_ms_default(),
                settle_ms: serial_settle_ms_default(),
            },
            mqtt: MqttConfig {
                host: env("HASSIO_MQTT_HOST").unwrap_or("core-mosquitto".to_string()),
                port,
                user: env("HASSIO_MQTT_USER").unwrap_or_default(),
                pass: env("HASSIO_MQTT_PASSWORD").unwrap_or_default(),
                ha_enabled: true,
                client_name: mqtt_client_name_default(),
                topic_prefix: options.mqtt_topic_prefix,
            },
        })
    }

    /// Looks for the add-on options first, then for the YAML config in the usual places
    pub fn load() -> Result<Self, ConfigError> {
        let options_path = std::env::var("NEVA_OPTIONS_PATH").unwrap_or(ADDON_OPTIONS_PATH.to_string());
        let options_path = Path::new(&options_path);
        if options_path.exists() {
            info!("Reading add-on options from {}", options_path.display());
            return Self::from_addon_options(&read_file(options_path)?, |k| std::env::var(k).ok());
        }

        for path in CONFIG_PATHS {
            let path = Path::new(path);
            if path.exists() {
                info!("Reading config from {}", path.display());
                return Self::from_yaml_file(path);
            }
            debug!("No config at {}", path.display());
        }

        Err(ConfigError::NotFound(format!("{}, {}", options_path.display(), CONFIG_PATHS.join(", "))))
    }
}
