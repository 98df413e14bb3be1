//! Home Assistant MQTT auto-discovery.
//!
//! Announces one sensor per schema rule marked for discovery, plus a status
//! entity for the bridge itself. Configs are retained and re-sent
//! periodically so entities come back after a broker restart.

use crate::config::DiscoveryConfig;
use crate::mqtt::{join_topic, OutboundMessage};
use crate::schema::{FieldRule, Schema};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DISCOVERY_PREFIX: &str = "homeassistant/sensor";
const MANUFACTURER: &str = "dsmr_mqtt_bridge";

pub struct DiscoveryAnnouncer {
    schema: Arc<Schema>,
    config: DiscoveryConfig,
    topic_prefix: String,
    version: String,
    outbound: Sender<OutboundMessage>,
}

impl DiscoveryAnnouncer {
    pub fn new(
        schema: Arc<Schema>,
        config: DiscoveryConfig,
        topic_prefix: &str,
        version: &str,
        outbound: Sender<OutboundMessage>,
    ) -> Self {
        Self {
            schema,
            config,
            topic_prefix: topic_prefix.to_string(),
            version: version.to_string(),
            outbound,
        }
    }

    fn device_id(&self) -> String {
        format!("dsmr{}", self.config.ha_id)
    }

    pub fn config_topic(&self, unique_id: &str) -> String {
        join_topic(
            &join_topic(DISCOVERY_PREFIX, &self.topic_prefix),
            &format!("{unique_id}/config"),
        )
    }

    fn status_config(&self) -> (String, Value) {
        let ha_id = &self.config.ha_id;
        let unique_id = format!("dsmr-device{ha_id}");
        let config = json!({
            "name": "status",
            "unique_id": unique_id,
            "state_topic": join_topic(&self.topic_prefix, "status"),
            "icon": "mdi:home-automation",
            "device": {
                "name": format!("DSMR P1{ha_id}"),
                "sw_version": self.version,
                "model": format!("P1 USB/dsmr-mqtt{ha_id}"),
                "manufacturer": MANUFACTURER,
                "identifiers": [self.device_id()],
            },
        });
        (unique_id, config)
    }

    fn sensor_config(&self, rule: &FieldRule) -> (String, Value) {
        let unique_id = format!("{}_{}{}", rule.destination, rule.tag, self.config.ha_id);
        let mut config = json!({
            "unique_id": unique_id,
            "name": rule.name(),
            "state_topic": join_topic(&self.topic_prefix, &rule.destination),
            "value_template": format!("{{{{ value_json.{} }}}}", rule.tag),
            "device": { "identifiers": [self.device_id()] },
        });
        if !rule.icon.is_empty() {
            config["icon"] = json!(rule.icon);
        }

        if let Some(unit) = rule.unit() {
            config["unit_of_measurement"] = json!(unit);
            match unit {
                "Wh" => {
                    config["device_class"] = json!("energy");
                    config["state_class"] = json!("total");
                }
                "W" => config["device_class"] = json!("power"),
                "A" => config["device_class"] = json!("current"),
                "V" => config["device_class"] = json!("voltage"),
                "m3" | "m\u{b3}" => {
                    // Published in litres, Home Assistant wants m³
                    config["device_class"] = json!("gas");
                    config["state_class"] = json!("total");
                    config["value_template"] = json!(format!(
                        "{{{{ value_json.{}|float/1000|round(3) }}}}",
                        rule.tag
                    ));
                }
                other => debug!(unit = other, tag = %rule.tag, "No device class for unit"),
            }
        }

        (unique_id, config)
    }

    /// `(unique_id, config)` for the status entity and every discoverable rule.
    pub fn build_configs(&self) -> Vec<(String, Value)> {
        std::iter::once(self.status_config())
            .chain(
                self.schema
                    .rules()
                    .filter(|rule| rule.include_in_discovery)
                    .map(|rule| self.sensor_config(rule)),
            )
            .collect()
    }

    pub fn announcements(&self) -> Vec<OutboundMessage> {
        self.build_configs()
            .into_iter()
            .map(|(unique_id, config)| {
                OutboundMessage::new(self.config_topic(&unique_id), config.to_string(), true)
            })
            .collect()
    }

    /// Empty retained payloads, which make Home Assistant drop the entities.
    pub fn removals(&self) -> Vec<OutboundMessage> {
        self.build_configs()
            .into_iter()
            .map(|(unique_id, _)| OutboundMessage::new(self.config_topic(&unique_id), "", true))
            .collect()
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(3600 / u64::from(self.config.rate_per_hour.max(1)))
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self, shutdown: CancellationToken) {
        if self.config.enabled {
            info!(interval = ?self.interval(), "Home Assistant discovery is enabled");
            loop {
                if !self.send_all(self.announcements()).await {
                    return;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.interval()) => {}
                }
            }
        } else {
            info!("Home Assistant discovery is disabled");
            shutdown.cancelled().await;
        }

        if self.config.delete_on_exit {
            debug!("Removing Home Assistant discovery configs");
            self.send_all(self.removals()).await;
        }
    }

    async fn send_all(&self, messages: Vec<OutboundMessage>) -> bool {
        for message in messages {
            if let Err(e) = self.outbound.send(message).await {
                warn!(error = %e, "Publisher gone, stopping discovery");
                return false;
            }
        }
        true
    }
}
