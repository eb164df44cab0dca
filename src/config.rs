use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub biostar: BiostarConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone)]
pub struct BiostarConfig {
    /// Host or host:port of the boiler controller.
    pub host: String,
    pub api_key: String,
    pub device_name: String,
    /// Topic segment identifying this boiler (lowercase, underscores).
    pub node_id: String,
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
    pub discovery_prefix: String,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let config = Self {
            biostar: BiostarConfig {
                host: env_required("BIOSTAR_HOST")?,
                api_key: env_required("BIOSTAR_API_KEY")?,
                device_name: env_or_default(
                    "BIOSTAR_DEVICE_NAME",
                    "Guntamatic Biostar".to_string(),
                ),
                node_id: env_or_default("BIOSTAR_NODE_ID", "biostar".to_string()),
                poll_interval_secs: env_or_default("BIOSTAR_POLL_INTERVAL_SECS", 60),
                timeout_secs: env_or_default("BIOSTAR_TIMEOUT_SECS", 15),
            },
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "guntamatic".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "guntamatic-to-mqtt".to_string()),
                discovery_prefix: env_or_default(
                    "HA_DISCOVERY_PREFIX",
                    "homeassistant".to_string(),
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.biostar.host.is_empty() {
            return Err("BIOSTAR_HOST must not be empty".into());
        }
        if self.mqtt.broker_host.is_empty() {
            return Err("MQTT_BROKER_HOST must not be empty".into());
        }
        if self.biostar.poll_interval_secs == 0 {
            return Err("BIOSTAR_POLL_INTERVAL_SECS must be > 0".into());
        }
        if self.biostar.timeout_secs == 0 {
            return Err("BIOSTAR_TIMEOUT_SECS must be > 0".into());
        }
        if self.biostar.timeout_secs >= self.biostar.poll_interval_secs {
            return Err(
                "BIOSTAR_TIMEOUT_SECS must be shorter than BIOSTAR_POLL_INTERVAL_SECS".into(),
            );
        }
        let node_id = &self.biostar.node_id;
        if node_id.is_empty()
            || !node_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(format!(
                "BIOSTAR_NODE_ID '{node_id}' must be lowercase letters, digits or underscores"
            ));
        }
        Ok(())
    }

    pub fn availability_topic(&self) -> String {
        format!("{}/{}/availability", self.mqtt.topic_prefix, self.biostar.node_id)
    }

    pub fn state_topic(&self, slug: &str) -> String {
        format!("{}/{}/state/{}", self.mqtt.topic_prefix, self.biostar.node_id, slug)
    }

    pub fn discovery_topic(&self, component: &str, slug: &str) -> String {
        format!(
            "{}/{}/{}/{}/config",
            self.mqtt.discovery_prefix, component, self.biostar.node_id, slug
        )
    }
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        biostar: BiostarConfig {
            host: "192.168.1.50".into(),
            api_key: "secret".into(),
            device_name: "Guntamatic Biostar".into(),
            node_id: "biostar".into(),
            poll_interval_secs: 60,
            timeout_secs: 15,
        },
        mqtt: MqttConfig {
            broker_host: "localhost".into(),
            broker_port: 1883,
            username: None,
            password: None,
            topic_prefix: "guntamatic".into(),
            client_id: "guntamatic-to-mqtt".into(),
            discovery_prefix: "homeassistant".into(),
        },
    }
}
