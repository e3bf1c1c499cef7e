use config::{Config, ConfigError, Environment};
use fleetsink_mqtt::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT configuration
    /// Broker URL: mqtt://host:port, tcp://host:port or host:port
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    /// Client identifier presented to the broker
    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    /// Optional broker credentials; both must be set to take effect
    #[serde(default)]
    pub mqtt_username: Option<String>,

    #[serde(default)]
    pub mqtt_password: Option<String>,

    /// Topic carrying the vehicle sensor readings
    #[serde(default = "default_mqtt_topic")]
    pub mqtt_topic: String,

    /// Subscription QoS level: 0, 1 or 2
    #[serde(default = "default_mqtt_qos")]
    pub mqtt_qos: u8,

    /// Keepalive in seconds; derived from the intake capacity when unset
    #[serde(default)]
    pub mqtt_keep_alive_secs: Option<u64>,

    // Intake configuration
    /// Capacity of the bounded intake queue between the subscriber and the
    /// ingestion loop
    #[serde(default = "default_max_buffered_messages")]
    pub max_buffered_messages: usize,

    // Reconnect configuration
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    // SQLite configuration
    /// Path of the database file; created on startup if absent
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// MQTT defaults
fn default_mqtt_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "fleetsink-ingestd".to_string()
}

fn default_mqtt_topic() -> String {
    "fleet/telemetry".to_string()
}

fn default_mqtt_qos() -> u8 {
    1
}

// Intake defaults
fn default_max_buffered_messages() -> usize {
    120
}

// Reconnect defaults
fn default_reconnect_base_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_secs() -> u64 {
    30
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

// SQLite defaults
fn default_sqlite_path() -> String {
    "sensor_data.db".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FLEETSINK"))
            .build()?
            .try_deserialize()
    }

    /// Keepalive interval for the broker session.
    ///
    /// When not configured it scales with the intake capacity, clamped to
    /// [10, 120] seconds, so a client slowly draining a full queue stays
    /// within one keepalive window.
    pub fn keep_alive(&self) -> Duration {
        let secs = match self.mqtt_keep_alive_secs {
            Some(secs) => secs,
            None => (self.max_buffered_messages as u64 / 4).clamp(10, 120),
        };
        Duration::from_secs(secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_secs(self.reconnect_max_delay_secs),
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure tests run serially and don't interfere with each other
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::remove_var("FLEETSINK_MQTT_TOPIC");

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.mqtt_broker_url, "mqtt://localhost:1883");
        assert_eq!(config.mqtt_topic, "fleet/telemetry");
        assert_eq!(config.mqtt_qos, 1);
        assert_eq!(config.max_buffered_messages, 120);
        assert_eq!(config.sqlite_path, "sensor_data.db");
        assert!(config.mqtt_username.is_none());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        std::env::set_var("FLEETSINK_MQTT_TOPIC", "fleet/batt/telemetry");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.mqtt_topic, "fleet/batt/telemetry");

        std::env::remove_var("FLEETSINK_MQTT_TOPIC");
    }

    #[test]
    fn test_keep_alive_derived_from_intake_capacity() {
        let _lock = TEST_LOCK.lock().unwrap();

        let mut config = ServiceConfig::from_env().unwrap();
        config.mqtt_keep_alive_secs = None;

        config.max_buffered_messages = 120;
        assert_eq!(config.keep_alive(), Duration::from_secs(30));

        // Clamped at both ends
        config.max_buffered_messages = 8;
        assert_eq!(config.keep_alive(), Duration::from_secs(10));
        config.max_buffered_messages = 10_000;
        assert_eq!(config.keep_alive(), Duration::from_secs(120));
    }

    #[test]
    fn test_explicit_keep_alive_wins() {
        let _lock = TEST_LOCK.lock().unwrap();

        let mut config = ServiceConfig::from_env().unwrap();
        config.mqtt_keep_alive_secs = Some(45);

        assert_eq!(config.keep_alive(), Duration::from_secs(45));
    }
}
