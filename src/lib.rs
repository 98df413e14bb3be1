//! DSMR P1 to MQTT bridge library
//!
//! Reads telegrams from a smart meter's P1 port (or a recorded file), decodes
//! the configured fields, throttles each field to its own publish rate and
//! publishes one JSON batch per destination topic. Optionally announces the
//! fields to Home Assistant through MQTT discovery.

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod derived_fields;
pub mod discovery;
pub mod dsmr50;
pub mod instance_lock;
pub mod mqtt;
pub mod pipeline;
pub mod rate_limiter;
pub mod schema;
pub mod serial_reader;
pub mod telegram;

// Re-export commonly used types for easier access
pub use aggregator::{Batch, BatchAggregator};
pub use config::Config;
pub use coordinator::TelegramCoordinator;
pub use decoder::{DecodeError, DecodedField, FieldDecoder, FieldValue};
pub use discovery::DiscoveryAnnouncer;
pub use instance_lock::InstanceLock;
pub use mqtt::{MqttPublisher, OutboundMessage};
pub use pipeline::TelegramPipeline;
pub use rate_limiter::RateLimiter;
pub use schema::{FieldRule, Schema, SchemaError, ValueType};
pub use telegram::{RawTelegram, TelegramHandoff};
