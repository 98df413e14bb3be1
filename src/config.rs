use crate::dsmr50;
use crate::schema::{Schema, SchemaError};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
const DEFAULT_BAUD_RATE: u32 = 115_200;
const DEFAULT_TOPIC_PREFIX: &str = "dsmr";
const SIMULATION_TOPIC_PREFIX: &str = "test_dsmr";
const DEFAULT_CLIENT_ID: &str = "mqtt-dsmr";
const SIMULATION_CLIENT_ID: &str = "mqtt-dsmr-test";
const SIMULATION_HA_ID: &str = "TEST";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Character framing of the P1 port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFraming {
    /// 8 data bits, no parity, 1 stop bit (DSMR 4 and 5).
    EightNoneOne,
    /// 7 data bits, even parity, 1 stop bit (DSMR 2.2 and 3).
    SevenEvenOne,
}

/// Where telegrams come from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub device: PathBuf,
    pub baud_rate: u32,
    pub framing: SerialFraming,
    /// Replay a recorded telegram file instead of reading the device.
    pub simulator_file: Option<PathBuf>,
}

impl SourceConfig {
    pub fn is_simulation(&self) -> bool {
        self.simulator_file.is_some()
    }

    pub fn input_path(&self) -> &Path {
        self.simulator_file.as_deref().unwrap_or(&self.device)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub qos: u8,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub delete_on_exit: bool,
    /// Announcements per hour.
    pub rate_per_hour: u32,
    /// Suffix for Home Assistant ids, keeps test instances apart.
    pub ha_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    Dsmr50,
    StromnetzGraz,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub source: SourceConfig,
    pub mqtt: MqttConfig,
    pub discovery: DiscoveryConfig,
    pub schema: SchemaSource,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let simulator_file = get("DSMR_SIMULATOR_FILE").map(PathBuf::from);
        let simulation = simulator_file.is_some();
        let source = SourceConfig {
            device: get("DSMR_DEVICE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE)),
            baud_rate: parse_number("DSMR_BAUDRATE", get("DSMR_BAUDRATE"), DEFAULT_BAUD_RATE)?,
            framing: match get("DSMR_FRAMING").as_deref().map(str::trim) {
                None | Some("8N1") => SerialFraming::EightNoneOne,
                Some("7E1") => SerialFraming::SevenEvenOne,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        name: "DSMR_FRAMING",
                        value: other.to_string(),
                        reason: "expected '8N1' or '7E1'",
                    })
                }
            },
            simulator_file,
        };
        if source.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                name: "DSMR_BAUDRATE",
                value: source.baud_rate.to_string(),
                reason: "must be positive",
            });
        }

        let mqtt = MqttConfig {
            broker: get("MQTT_BROKER").unwrap_or_else(|| "localhost".to_string()),
            port: parse_number("MQTT_PORT", get("MQTT_PORT"), 1883)?,
            client_id: get("MQTT_CLIENT_ID").unwrap_or_else(|| {
                let default = if simulation {
                    SIMULATION_CLIENT_ID
                } else {
                    DEFAULT_CLIENT_ID
                };
                default.to_string()
            }),
            qos: parse_number("MQTT_QOS", get("MQTT_QOS"), 1u8)?,
            username: get("MQTT_USERNAME"),
            password: get("MQTT_PASSWORD"),
            topic_prefix: get("MQTT_TOPIC_PREFIX").unwrap_or_else(|| {
                let default = if simulation {
                    SIMULATION_TOPIC_PREFIX
                } else {
                    DEFAULT_TOPIC_PREFIX
                };
                default.to_string()
            }),
        };
        if mqtt.qos > 2 {
            return Err(ConfigError::Invalid {
                name: "MQTT_QOS",
                value: mqtt.qos.to_string(),
                reason: "must be 0, 1 or 2",
            });
        }

        let discovery = DiscoveryConfig {
            enabled: parse_bool_or(get("HA_DISCOVERY"), true),
            delete_on_exit: parse_bool_or(get("HA_DELETECONFIG"), true),
            rate_per_hour: parse_number("HA_DISCOVERY_RATE", get("HA_DISCOVERY_RATE"), 12u32)?,
            ha_id: lookup("HA_ID").unwrap_or_else(|| {
                let default = if simulation { SIMULATION_HA_ID } else { "" };
                default.to_string()
            }),
        };
        if !(1..=3600).contains(&discovery.rate_per_hour) {
            return Err(ConfigError::Invalid {
                name: "HA_DISCOVERY_RATE",
                value: discovery.rate_per_hour.to_string(),
                reason: "must be within 1..=3600",
            });
        }

        let schema = match get("DSMR_SCHEMA_FILE") {
            Some(path) => SchemaSource::File(PathBuf::from(path)),
            None => match get("DSMR_SCHEMA").as_deref().map(str::trim) {
                None | Some("dsmr50") => SchemaSource::Dsmr50,
                Some("graz") => SchemaSource::StromnetzGraz,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        name: "DSMR_SCHEMA",
                        value: other.to_string(),
                        reason: "expected 'dsmr50' or 'graz'",
                    })
                }
            },
        };

        Ok(Self {
            source,
            mqtt,
            discovery,
            schema,
        })
    }

    /// Builds the field schema selected by the configuration.
    pub fn load_schema(&self) -> Result<Schema, SchemaError> {
        match &self.schema {
            SchemaSource::Dsmr50 => Schema::from_table(dsmr50::DEFINITION),
            SchemaSource::StromnetzGraz => Schema::from_table(dsmr50::STROMNETZ_GRAZ),
            SchemaSource::File(path) => Schema::from_json_file(path),
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(text) => text.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: text,
            reason: "not a number in range",
        }),
    }
}

/// Parses a case-insensitive `true`/`false`, falling back to `default`.
fn parse_bool_or(val: Option<String>, default: bool) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_parse_bool_or() {
        assert!(!parse_bool_or(None, false));
        assert!(parse_bool_or(None, true));
        assert!(parse_bool_or(Some("".to_string()), true));

        assert!(parse_bool_or(Some("true".to_string()), false));
        assert!(parse_bool_or(Some("TrUe".to_string()), false));
        assert!(!parse_bool_or(Some("false".to_string()), true));
        assert!(!parse_bool_or(Some("FALSE".to_string()), true));

        // Anything else falls back
        assert!(parse_bool_or(Some("yes".to_string()), true));
        assert!(!parse_bool_or(Some("1".to_string()), false));
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.source.device, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(config.source.baud_rate, 115_200);
        assert_eq!(config.source.framing, SerialFraming::EightNoneOne);
        assert!(!config.source.is_simulation());
        assert_eq!(config.mqtt.broker, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.mqtt.client_id, "mqtt-dsmr");
        assert_eq!(config.mqtt.topic_prefix, "dsmr");
        assert_eq!(config.mqtt.username, None);
        assert!(config.discovery.enabled);
        assert!(config.discovery.delete_on_exit);
        assert_eq!(config.discovery.rate_per_hour, 12);
        assert_eq!(config.discovery.ha_id, "");
        assert_eq!(config.schema, SchemaSource::Dsmr50);
    }

    #[test]
    fn test_simulation_changes_defaults() {
        let config = config(&[("DSMR_SIMULATOR_FILE", "test/dsmr.raw")]).unwrap();
        assert!(config.source.is_simulation());
        assert_eq!(config.source.input_path(), Path::new("test/dsmr.raw"));
        assert_eq!(config.mqtt.topic_prefix, "test_dsmr");
        assert_eq!(config.mqtt.client_id, "mqtt-dsmr-test");
        assert_eq!(config.discovery.ha_id, "TEST");
    }

    #[test]
    fn test_explicit_values() {
        let config = config(&[
            ("MQTT_BROKER", "192.168.1.1"),
            ("MQTT_PORT", "8883"),
            ("MQTT_QOS", "0"),
            ("MQTT_USERNAME", "user"),
            ("MQTT_PASSWORD", "secret"),
            ("MQTT_TOPIC_PREFIX", "meter/"),
            ("HA_DISCOVERY", "false"),
            ("HA_DISCOVERY_RATE", "60"),
            ("DSMR_SCHEMA", "graz"),
        ])
        .unwrap();
        assert_eq!(config.mqtt.broker, "192.168.1.1");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.qos, 0);
        assert_eq!(config.mqtt.username.as_deref(), Some("user"));
        assert_eq!(config.mqtt.topic_prefix, "meter/");
        assert!(!config.discovery.enabled);
        assert_eq!(config.discovery.rate_per_hour, 60);
        assert_eq!(config.schema, SchemaSource::StromnetzGraz);
        assert!(config.load_schema().unwrap().lookup("1-0:1.8.0").is_some());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[("MQTT_PORT", "70000")]).is_err());
        assert!(config(&[("MQTT_QOS", "3")]).is_err());
        assert!(config(&[("HA_DISCOVERY_RATE", "0")]).is_err());
        assert!(config(&[("HA_DISCOVERY_RATE", "3601")]).is_err());
        assert!(config(&[("DSMR_SCHEMA", "dsmr42")]).is_err());
    }

    #[test]
    fn test_schema_file_wins() {
        let config = config(&[
            ("DSMR_SCHEMA", "graz"),
            ("DSMR_SCHEMA_FILE", "/etc/dsmr.json"),
        ])
        .unwrap();
        assert_eq!(
            config.schema,
            SchemaSource::File(PathBuf::from("/etc/dsmr.json"))
        );
    }

    #[test]
    fn test_serial_settings() {
        let parsed = config(&[
            ("DSMR_DEVICE", "/dev/ttyAMA0"),
            ("DSMR_BAUDRATE", "9600"),
            ("DSMR_FRAMING", "7E1"),
        ])
        .unwrap();
        assert_eq!(parsed.source.device, PathBuf::from("/dev/ttyAMA0"));
        assert_eq!(parsed.source.baud_rate, 9600);
        assert_eq!(parsed.source.framing, SerialFraming::SevenEvenOne);

        assert!(config(&[("DSMR_BAUDRATE", "fast")]).is_err());
        assert!(config(&[("DSMR_BAUDRATE", "0")]).is_err());
        assert!(config(&[("DSMR_FRAMING", "8E2")]).is_err());
    }
}
