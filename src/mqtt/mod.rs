pub mod ha_interface;

use std::io::Error;
use crate::config::MqttConfig;
use crate::metering_neva::structs::ReadingsSnapshot;
use crate::mqtt::ha_interface::HaDiscover;
use log::{debug, error, info};
use tokio::sync::mpsc::{Receiver, Sender};
use serde::{Serialize, Deserialize};
use serde_json;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MeteringData {
    pub id: String,
    pub meter_name: String,
    pub model: String,
    pub transmission_time: u64,
    pub metered_time: u64,
    pub metered_values: serde_json::Map<String, serde_json::Value>
}

impl MeteringData {
    pub fn from_snapshot(meter_name: &str, snapshot: &ReadingsSnapshot) -> Self {
        let transmission_time = crate::get_unix_ts();
        return MeteringData {
            id: crate::get_id("neva", meter_name),
            meter_name: meter_name.to_string(),
            model: snapshot.device_type.model().to_string(),
            transmission_time,
            metered_time: snapshot.taken_at.timestamp().max(0) as u64,
            metered_values: snapshot.to_values(),
        };
    }
}

pub enum Transmission {
    Metering(MeteringData),
    AutoDiscovery(HaDiscover),
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    exit_thread: bool,
    client: AsyncClient,
    topic_prefix: String,
}

/// One `(topic, payload)` per reading, strings go out unquoted
pub fn value_topics(prefix: &str, data: &MeteringData) -> Vec<(String, String)> {
    data.metered_values
        .iter()
        .map(|(key, value)| {
            let payload = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (format!("{prefix}/{key}"), payload)
        })
        .collect()
}

pub fn state_topic(prefix: &str) -> String {
    format!("{prefix}/state")
}

/// Retained discovery publish, returns false if it could not be queued
async fn publish_discovery(client: &AsyncClient, disc: &HaDiscover) -> bool {
    let json = match serde_json::to_string(disc) {
        Ok(json) => json,
        Err(e) => {
            error!("Unable to serialize discovery: {}", e);
            return false;
        }
    };

    info!("Registering {} with Home Assistant", disc.get_dev_id());
    if let Err(e) = client.publish(disc.discover_topic.clone(), QoS::AtLeastOnce, true, json).await {
        error!("Error sending discovery for {}: {}", disc.get_dev_id(), e);
        return false;
    }
    true
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> Result<(Self, Sender<Transmission>), Error> {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(60));
        if config.has_credentials() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        /* The event loop has to be polled for anything to leave the client */
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    },
                    Ok(_) => {},
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting ", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        return Ok((MqttManager {
            client,
            rx: mrx,
            exit_thread: false,
            topic_prefix: config.topic_prefix.clone(),
        }, mtx));
    }

    pub async fn start_thread(&mut self) {
        while !self.exit_thread {
            let option = self.rx.recv().await;

            let transmission = match option {
                Some(t) => t,
                None => {
                    debug!("Reading returned none, we exit now");
                    self.exit_thread = true;
                    continue;
                }
            };

            match transmission {
                Transmission::Metering(data) => {
                    info!("Metering data received: {}", data.id);
                    match serde_json::to_string(&data.metered_values) {
                        Ok(json) => {
                            if let Err(e) = self.client.publish(state_topic(&self.topic_prefix), QoS::AtLeastOnce, false, json).await {
                                error!("Error sending: {}", e);
                            }
                        },
                        Err(e) => { error!("Unable to serialize readings: {}", e); }
                    }

                    for (topic, payload) in value_topics(&self.topic_prefix, &data) {
                        if let Err(e) = self.client.publish(topic.clone(), QoS::AtLeastOnce, false, payload).await {
                            error!("Error sending {}: {}", topic, e);
                        }
                    }
                },
                Transmission::AutoDiscovery(disc) => {
                    publish_discovery(&self.client, &disc).await;
                },
            };
        }

        info!("MQTT thread exit");
    }
}
