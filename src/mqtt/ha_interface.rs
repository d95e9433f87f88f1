use serde::Serialize;

#[derive(Serialize)]
pub struct HaDevice {
    ids: String,
    name: String,
    manufacturer: String,
    model: String,
}

#[derive(Serialize)]
pub struct HaOrigin {
    pub name: String,
    pub sw_version: String,
}

fn is_none_str(value: &String) -> bool {
    if value.is_empty() || value == "NONE" {
        return true;
    }
    return false;
}

#[derive(Serialize)]
pub struct HaComponent {
    pub p: String,
    pub name: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub device_class: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub unit_of_measurement: String,
    pub value_template: String,
    pub unique_id: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "is_none_str")]
    pub state_class: String,
}

impl HaComponent {
    pub fn new(device: &str, dclass: &str, uof: &str, name: &str, json_key: &str, state_class: &str) -> Self {
        return HaComponent {
            p: "sensor".to_string(),
            name: name.to_string(),
            device_class: dclass.to_string(),
            unit_of_measurement: uof.to_string(),
            value_template: format!("{{{{ value_json.{json_key} }}}}"),
            unique_id: format!("{device}_{json_key}").to_lowercase(),
            object_id: format!("{device}_{json_key}").to_lowercase(),
            state_class: state_class.to_string(),
        }
    }

    pub fn new_energy(device: &str, name: &str, json_key: &str) -> Self {
        Self::new(device, "energy", "kWh", name, json_key, "total_increasing")
    }

    pub fn new_power(device: &str, name: &str, json_key: &str) -> Self {
        Self::new(device, "power", "W", name, json_key, "measurement")
    }

    pub fn new_voltage(device: &str, name: &str, json_key: &str) -> Self {
        Self::new(device, "voltage", "V", name, json_key, "measurement")
    }

    pub fn new_current(device: &str, name: &str, json_key: &str) -> Self {
        Self::new(device, "current", "A", name, json_key, "measurement")
    }

    pub fn new_percent(device: &str, dclass: &str, name: &str, json_key: &str) -> Self {
        Self::new(device, dclass, "%", name, json_key, "measurement")
    }

    /// Plain text sensor without unit or statistics
    pub fn new_text(device: &str, name: &str, json_key: &str) -> Self {
        Self::new(device, "NONE", "NONE", name, json_key, "NONE")
    }
}

#[derive(Serialize)]
pub struct HaDiscover {
    pub dev: HaDevice,
    pub o: HaOrigin,
    pub cmps: serde_json::Map<String, serde_json::Value>,
    pub state_topic: String,
    pub qos: u32,
    #[serde(skip_serializing)]
    pub discover_topic: String,
}

impl HaDiscover {
    pub fn new(device: &str, name: &str, manu: &str, model: &str, state_topic: String) -> Self {
        return HaDiscover {
            discover_topic: format!("homeassistant/device/{device}/config"),
            dev: HaDevice {
                ids: device.to_string(),
                name: name.to_string(),
                manufacturer: manu.to_string(),
                model: model.to_string(),
            },
            o: HaOrigin {
                name: "neva2mqtt".to_string(),
                sw_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            cmps: serde_json::Map::new(),
            state_topic,
            qos: 1,
        }
    }

    pub fn add(&mut self, json_key: &str, component: HaComponent) {
        if let Ok(value) = serde_json::to_value(component) {
            self.cmps.insert(json_key.to_string(), value);
        }
    }

    pub fn get_dev_id(&self) -> String {
        return self.dev.ids.clone();
    }
}
