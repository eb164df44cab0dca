use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::biostar::{PollOutcome, ReadingSet};
use crate::config::Config;

use super::discovery::{Device, SlugRegistry, discovery, state_payload};

const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
    /// Keys whose discovery config has been published since the last connect.
    announced: HashSet<String>,
    /// Last published state payload per slug.
    last_values: HashMap<String, String>,
    /// Topic segment per key, kept for the whole process lifetime.
    slugs: SlugRegistry,
    device: Option<Device>,
    /// Availability published since the last connect.
    availability: Option<&'static str>,
    /// Availability derived from the most recent poll outcome.
    last_status: Option<&'static str>,
}

impl MqttClient {
    pub fn new(config: &Config) -> Self {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        // HA marks every entity unavailable if the bridge drops off the broker.
        let lwt = rumqttc::LastWill::new(
            config.availability_topic(),
            OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            config: config.clone(),
            announced: HashSet::new(),
            last_values: HashMap::new(),
            slugs: SlugRegistry::new(),
            device: None,
            availability: None,
            last_status: None,
        }
    }

    /// Run the MQTT event loop and publish every poll outcome received from
    /// `outcome_rx`. Returns when the poller side of the channel closes.
    pub async fn run(mut self, mut outcome_rx: mpsc::Receiver<PollOutcome>) {
        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            self.on_connected();
                            self.restore_availability().await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                outcome = outcome_rx.recv() => {
                    match outcome {
                        Some(PollOutcome::Readings { readings, device }) => {
                            let name = &self.config.biostar.device_name;
                            let device = Device::new(name, device.as_ref());
                            self.publish_readings(&readings, device).await;
                            self.set_availability(ONLINE).await;
                        }
                        Some(PollOutcome::Unavailable) => {
                            // Retained states stay as the last known values.
                            self.set_availability(OFFLINE).await;
                        }
                        None => {
                            info!("Poller channel closed, stopping MQTT publisher");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn on_connected(&mut self) {
        info!("Connected to MQTT broker");
        // Re-announce everything on the next outcome.
        self.announced.clear();
        self.last_values.clear();
        self.availability = None;
    }

    /// The broker may still hold the retained last will from a previous
    /// session. Republish the status of the latest poll outcome over it.
    async fn restore_availability(&mut self) {
        if let Some(status) = self.last_status {
            self.set_availability(status).await;
        }
    }

    async fn publish_readings(&mut self, readings: &ReadingSet, device: Device) {
        if self.device.as_ref() != Some(&device) {
            // Device block changed (e.g. firmware reported for the first time).
            self.announced.clear();
            self.device = Some(device.clone());
        }

        for (key, reading) in readings.iter() {
            let Some(slug) = self.slugs.slug_for(key).map(String::from) else {
                debug!("Skipping reading with unusable key {:?}", key);
                continue;
            };

            if !self.announced.contains(key) {
                let (topic, entity) = discovery(&self.config, key, &slug, reading, &device);
                match serde_json::to_vec(&entity) {
                    Ok(payload) => self.publish(&topic, true, payload).await,
                    Err(e) => {
                        warn!("Failed to serialize discovery for {}: {}", key, e);
                        continue;
                    }
                }
                self.announced.insert(key.to_string());
            }

            let value = state_payload(&reading.value);
            if self.last_values.get(&slug) != Some(&value) {
                self.last_values.insert(slug.clone(), value.clone());
                let topic = self.config.state_topic(&slug);
                debug!("Publishing {}: {}", topic, value);
                self.publish(&topic, true, value).await;
            }
        }
    }

    async fn set_availability(&mut self, status: &'static str) {
        if self.availability == Some(status) {
            return;
        }
        info!("Biostar availability: {}", status);
        let topic = self.config.availability_topic();
        self.publish(&topic, true, status).await;
        self.availability = Some(status);
        self.last_status = Some(status);
    }

    async fn publish(&mut self, topic: &str, retain: bool, payload: impl Into<Vec<u8>>) {
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
        {
            warn!("Failed to publish {}: {}", topic, e);
            return;
        }
        // Drive the event loop to immediately flush this publish to the socket
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => self.on_connected(),
            Err(e) => error!("MQTT error after publish flush: {}", e),
            _ => {}
        }
    }
}
