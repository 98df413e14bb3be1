use crate::config::Config;
use crate::discovery::DiscoveryAnnouncer;
use crate::mqtt::OutboundMessage;
use crate::pipeline::TelegramPipeline;
use crate::schema::Schema;
use crate::serial_reader::{self, TelegramReader};
use crate::telegram::TelegramHandoff;
use anyhow::Context;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wires the telegram reader thread, the decode pipeline and the discovery
/// announcer together and owns their handles.
///
/// Every worker watches the same shutdown token. The reader cancels it when
/// the input ends, so end of a simulation file stops the whole process.
pub struct TelegramCoordinator {
    reader: std::thread::JoinHandle<()>,
    pipeline: JoinHandle<()>,
    discovery: JoinHandle<()>,
}

impl TelegramCoordinator {
    /// Opens the configured input and starts all workers.
    pub fn start(
        config: &Config,
        schema: Arc<Schema>,
        version: &str,
        outbound: Sender<OutboundMessage>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let input = serial_reader::open_input(&config.source)?;
        Self::start_with_input(input, config, schema, version, outbound, shutdown)
    }

    /// Starts all workers reading telegrams from `input`.
    pub fn start_with_input<R: BufRead + Send + 'static>(
        input: R,
        config: &Config,
        schema: Arc<Schema>,
        version: &str,
        outbound: Sender<OutboundMessage>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        info!(fields = schema.len(), "Initializing telegram coordinator");

        let handoff = Arc::new(TelegramHandoff::new());

        let pipeline =
            TelegramPipeline::new(schema.clone(), &config.mqtt.topic_prefix, outbound.clone());
        let pipeline = tokio::spawn(pipeline.run(handoff.clone(), shutdown.clone()));

        let discovery = DiscoveryAnnouncer::new(
            schema,
            config.discovery.clone(),
            &config.mqtt.topic_prefix,
            version,
            outbound,
        )
        .spawn(shutdown.clone());

        let reader = TelegramReader::new(input, handoff, shutdown, config.source.is_simulation())
            .spawn()
            .context("Cannot start telegram reader thread")?;

        info!("All workers started");
        Ok(Self {
            reader,
            pipeline,
            discovery,
        })
    }

    /// Waits for every worker to finish. Call after the shutdown token has
    /// been cancelled, or let the end of input cancel it.
    pub async fn wait(self) -> anyhow::Result<()> {
        self.pipeline.await.context("Pipeline task failed")?;
        self.discovery.await.context("Discovery task failed")?;

        // Device reads time out regularly, so the reader sees the stop token
        tokio::task::spawn_blocking(move || self.reader.join())
            .await
            .context("Cannot join telegram reader")?
            .map_err(|_| anyhow::anyhow!("Telegram reader thread panicked"))?;
        info!("Telegram coordinator stopped");
        Ok(())
    }
}
