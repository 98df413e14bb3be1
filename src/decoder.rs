use crate::schema::{FieldRule, Schema, ValueType};
use regex::Regex;
use serde_derive::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Up to three dot separated groups after the `medium-channel:` prefix, e.g. `1-0:32.7.0`.
const IDENTIFIER_PATTERN: &str = r"^(\d{0,3}-\d{0,3}:\d{0,3}\.\d{0,3}\.\d{0,3})";

/// A decoded, cast and scaled value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_zero(&self) -> bool {
        match self {
            FieldValue::Integer(v) => *v == 0,
            FieldValue::Float(v) => *v == 0.0,
            FieldValue::Text(_) => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

/// One field pulled out of one telegram line.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub destination: String,
    pub tag: String,
    pub value: FieldValue,
    pub max_emits_per_hour: u32,
    /// Telegram processing time, epoch seconds.
    pub timestamp: u64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("field '{id}': line does not match the rule pattern")]
    PatternMismatch { id: String },
    #[error("field '{id}': cannot cast '{text}' to {value_type:?}")]
    InvalidValue {
        id: String,
        text: String,
        value_type: ValueType,
    },
    #[error("field '{id}': zero value is not allowed")]
    ZeroRejected { id: String },
}

/// Decodes a line that is already known to belong to `rule`.
///
/// The pattern must match at the start of the line; a match further in is a
/// mismatch.
pub fn decode(line: &str, rule: &FieldRule, now: u64) -> Result<DecodedField, DecodeError> {
    let captured = rule
        .pattern
        .captures(line)
        .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
        .and_then(|caps| caps.get(rule.value_group))
        .ok_or_else(|| DecodeError::PatternMismatch {
            id: rule.id.clone(),
        })?
        .as_str();

    let value = cast(captured, rule)?;
    if !rule.zero_allowed && value.is_zero() {
        return Err(DecodeError::ZeroRejected {
            id: rule.id.clone(),
        });
    }

    Ok(DecodedField {
        destination: rule.destination.clone(),
        tag: rule.tag.clone(),
        value,
        max_emits_per_hour: rule.max_emits_per_hour,
        timestamp: now,
    })
}

fn cast(text: &str, rule: &FieldRule) -> Result<FieldValue, DecodeError> {
    let invalid = || DecodeError::InvalidValue {
        id: rule.id.clone(),
        text: text.to_string(),
        value_type: rule.value_type,
    };

    match rule.value_type {
        ValueType::Integer => text
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|v| v.checked_mul(rule.scale as i64))
            .map(FieldValue::Integer)
            .ok_or_else(invalid),
        ValueType::Float => text
            .trim()
            .parse::<f64>()
            .ok()
            .map(|v| v * rule.scale)
            .filter(|v| v.is_finite())
            .map(FieldValue::Float)
            .ok_or_else(invalid),
        ValueType::Text => Ok(FieldValue::Text(text.to_string())),
    }
}

/// Turns telegram lines into [`DecodedField`]s using a shared [`Schema`].
pub struct FieldDecoder {
    schema: Arc<Schema>,
    identifier: Regex,
}

impl FieldDecoder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            identifier: Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the field identifier prefixing `line`, if it has one.
    ///
    /// Headers, checksum lines, blank lines and the sequence counter have no
    /// identifier; that is normal and not an error.
    pub fn identifier<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.identifier
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Decodes a single line.
    ///
    /// `Ok(None)` means the line is not ours: it has no identifier, or the
    /// identifier has no rule in the schema.
    pub fn decode_line(&self, line: &str, now: u64) -> Result<Option<DecodedField>, DecodeError> {
        let Some(id) = self.identifier(line) else {
            return Ok(None);
        };
        let Some(rule) = self.schema.lookup(id) else {
            return Ok(None);
        };
        decode(line, rule, now).map(Some)
    }

    /// Decodes every line of a telegram, skipping lines that fail.
    pub fn decode_telegram<S: AsRef<str>>(&self, lines: &[S], now: u64) -> Vec<DecodedField> {
        lines
            .iter()
            .filter_map(|line| match self.decode_line(line.as_ref(), now) {
                Ok(field) => field,
                Err(e) => {
                    debug!(line = line.as_ref(), error = %e, "skipping telegram line");
                    None
                }
            })
            .collect()
    }
}
