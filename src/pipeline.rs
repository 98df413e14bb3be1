use crate::aggregator::BatchAggregator;
use crate::decoder::FieldDecoder;
use crate::mqtt::{join_topic, OutboundMessage};
use crate::schema::Schema;
use crate::telegram::{RawTelegram, TelegramHandoff};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Seconds since the Unix epoch.
pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Turns captured telegrams into MQTT messages: decode every line, batch the
/// fields per destination and serialise each batch.
pub struct TelegramPipeline {
    decoder: FieldDecoder,
    aggregator: BatchAggregator,
    topic_prefix: String,
    outbound: Sender<OutboundMessage>,
}

impl TelegramPipeline {
    pub fn new(schema: Arc<Schema>, topic_prefix: &str, outbound: Sender<OutboundMessage>) -> Self {
        Self {
            decoder: FieldDecoder::new(schema),
            aggregator: BatchAggregator::new(),
            topic_prefix: topic_prefix.to_string(),
            outbound,
        }
    }

    /// Processes one telegram at time `now` and returns the messages to
    /// publish, one per destination that has at least one admitted field.
    pub fn process(&mut self, telegram: &RawTelegram, now: u64) -> Vec<OutboundMessage> {
        let fields = self.decoder.decode_telegram(&telegram.lines, now);
        let batches = self.aggregator.aggregate(fields, now);

        let mut messages = Vec::with_capacity(batches.len());
        for (destination, batch) in batches {
            match batch.to_payload() {
                Ok(payload) => messages.push(OutboundMessage::new(
                    join_topic(&self.topic_prefix, &destination),
                    payload,
                    false,
                )),
                Err(e) => warn!(%destination, error = %e, "Cannot serialise batch"),
            }
        }
        debug!(
            sequence = telegram.sequence,
            lines = telegram.lines.len(),
            messages = messages.len(),
            "Telegram processed"
        );
        messages
    }

    /// Consumes telegrams from `handoff` until `shutdown` fires. A telegram
    /// handed off just before shutdown is still processed.
    pub async fn run(mut self, handoff: Arc<TelegramHandoff>, shutdown: CancellationToken) {
        info!("Starting telegram pipeline");
        loop {
            let telegram = tokio::select! {
                telegram = handoff.wait_for_telegram(POLL_TIMEOUT) => telegram,
                _ = shutdown.cancelled() => break,
            };
            if let Some(telegram) = telegram {
                if !self.forward(&telegram).await {
                    return;
                }
            }
        }

        if let Some(telegram) = handoff.take_snapshot() {
            self.forward(&telegram).await;
        }
        info!("Telegram pipeline stopped");
    }

    async fn forward(&mut self, telegram: &RawTelegram) -> bool {
        for message in self.process(telegram, epoch_seconds()) {
            if self.outbound.send(message).await.is_err() {
                warn!("Publisher gone, stopping pipeline");
                return false;
            }
        }
        true
    }
}
