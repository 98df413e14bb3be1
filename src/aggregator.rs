use crate::decoder::{DecodedField, FieldValue};
use crate::rate_limiter::RateLimiter;
use crate::schema::TIMESTAMP_TAG;
use std::collections::BTreeMap;

/// The body of one outbound message: tag -> value for a single destination.
///
/// Always contains the telegram `timestamp`. Keys are kept sorted so the JSON
/// payload is canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    destination: String,
    values: BTreeMap<String, FieldValue>,
}

impl Batch {
    pub fn new(destination: &str, timestamp: u64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(
            TIMESTAMP_TAG.to_string(),
            FieldValue::Integer(timestamp as i64),
        );
        Self {
            destination: destination.to_string(),
            values,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn get(&self, tag: &str) -> Option<&FieldValue> {
        self.values.get(tag)
    }

    pub fn insert(&mut self, tag: &str, value: FieldValue) {
        self.values.insert(tag.to_string(), value);
    }

    /// True when nothing but the timestamp is present.
    pub fn has_data(&self) -> bool {
        self.values.len() > 1
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compact, key-sorted JSON.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.values)
    }
}

/// Groups decoded fields into per-destination batches, letting the
/// [`RateLimiter`] decide which fields survive.
#[derive(Debug, Default)]
pub struct BatchAggregator {
    limiter: RateLimiter,
}

impl BatchAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Builds the batches for one telegram. Batches with no admitted field
    /// are dropped.
    pub fn aggregate<I>(&mut self, fields: I, timestamp: u64) -> BTreeMap<String, Batch>
    where
        I: IntoIterator<Item = DecodedField>,
    {
        let mut batches: BTreeMap<String, Batch> = BTreeMap::new();

        for field in fields {
            let batch = batches
                .entry(field.destination.clone())
                .or_insert_with(|| Batch::new(&field.destination, timestamp));

            if self.limiter.admit(
                &field.destination,
                &field.tag,
                field.max_emits_per_hour,
                timestamp,
            ) {
                batch.insert(&field.tag, field.value);
            }
        }

        batches.retain(|_, batch| batch.has_data());
        batches
    }
}
