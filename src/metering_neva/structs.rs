use super::commands::Command;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Meter families that speak this dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    Unknown,
    Type6102,
    Type7109,
}

impl DeviceType {
    /// Maps the number found in the identification line. 2106 is the ID test meters report.
    pub fn from_code(code: u64) -> Self {
        match code {
            6102 | 2106 => DeviceType::Type6102,
            7109 => DeviceType::Type7109,
            _ => DeviceType::Unknown,
        }
    }

    pub fn password_command(&self) -> Option<Command> {
        match self {
            DeviceType::Type6102 => Some(Command::Password6102),
            DeviceType::Type7109 => Some(Command::Password7109),
            DeviceType::Unknown => None,
        }
    }

    pub fn tariffs_command(&self) -> Option<Command> {
        match self {
            DeviceType::Type6102 => Some(Command::Tariffs6102),
            DeviceType::Type7109 => Some(Command::Tariffs7109),
            DeviceType::Unknown => None,
        }
    }

    pub fn model(&self) -> &'static str {
        match self {
            DeviceType::Type6102 => "MT124-6102",
            DeviceType::Type7109 => "MT124-7109",
            DeviceType::Unknown => "MT124",
        }
    }
}

/// Fixed point decimal: `raw / divisor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaledValue {
    pub raw: u64,
    pub divisor: u32,
}

pub const MAX_DIVISOR: u32 = 10_000;

impl ScaledValue {
    pub fn new(raw: u64, divisor: u32) -> Self {
        debug_assert!(matches!(divisor, 1 | 10 | 100 | 1_000 | MAX_DIVISOR));
        ScaledValue { raw, divisor }
    }

    pub fn integer(raw: u64) -> Self {
        ScaledValue { raw, divisor: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.raw as f64 / self.divisor as f64
    }

    /// Rescales to a larger power of ten divisor
    pub fn with_divisor(&self, divisor: u32) -> Self {
        if divisor <= self.divisor {
            return *self;
        }
        let factor = (divisor / self.divisor) as u64;
        ScaledValue { raw: self.raw.saturating_mul(factor), divisor }
    }
}

/// Sum of two values with possibly different precision
impl std::ops::Add for ScaledValue {
    type Output = ScaledValue;

    fn add(self, other: ScaledValue) -> ScaledValue {
        let divisor = self.divisor.max(other.divisor);
        let a = self.with_divisor(divisor);
        let b = other.with_divisor(divisor);
        ScaledValue { raw: a.raw.saturating_add(b.raw), divisor }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TariffReadings {
    pub total: ScaledValue,
    pub tariffs: [ScaledValue; 4],
}

/// Everything one poll cycle managed to read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingsSnapshot {
    pub device_type: DeviceType,
    pub taken_at: DateTime<Utc>,
    pub serial_number: Option<String>,
    pub battery_level: Option<u8>,
    pub tariffs: Option<TariffReadings>,
    pub power: Option<ScaledValue>,
    pub voltage: Option<ScaledValue>,
    pub current: Option<ScaledValue>,
}

impl ReadingsSnapshot {
    pub fn new(device_type: DeviceType) -> Self {
        ReadingsSnapshot {
            device_type,
            taken_at: Utc::now(),
            serial_number: None,
            battery_level: None,
            tariffs: None,
            power: None,
            voltage: None,
            current: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.serial_number.is_none()
            && self.battery_level.is_none()
            && self.tariffs.is_none()
            && self.power.is_none()
            && self.voltage.is_none()
            && self.current.is_none()
    }

    /// Flat key/value view, the keys double as MQTT sub topics
    pub fn to_values(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut values = serde_json::Map::new();

        if let Some(serial) = &self.serial_number {
            values.insert("serial".to_string(), serial.clone().into());
        }
        if let Some(battery) = self.battery_level {
            values.insert("battery".to_string(), battery.into());
        }
        if let Some(tariffs) = &self.tariffs {
            values.insert("total_energy".to_string(), tariffs.total.as_f64().into());
            for (i, tariff) in tariffs.tariffs.iter().enumerate() {
                values.insert(format!("tariff{}", i + 1), tariff.as_f64().into());
            }
        }
        if let Some(power) = self.power {
            values.insert("power".to_string(), power.as_f64().into());
        }
        if let Some(voltage) = self.voltage {
            values.insert("voltage".to_string(), voltage.as_f64().into());
        }
        if let Some(current) = self.current {
            values.insert("current".to_string(), current.as_f64().into());
        }

        values
    }
}
