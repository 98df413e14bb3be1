use crate::config::MqttConfig;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Time given to the event loop to flush queued messages before disconnecting.
const DRAIN_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 100;
const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_BACKLOG: usize = 10_000;
const OUTBOUND_CAPACITY: usize = 128;

/// A message waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}

/// Joins `prefix` and `name` with `/`, collapsing repeated separators.
pub fn join_topic(prefix: &str, name: &str) -> String {
    let joined = format!("{prefix}/{name}");
    let mut topic = String::with_capacity(joined.len());
    let mut previous_slash = false;
    for c in joined.chars() {
        let slash = c == '/';
        if !(slash && previous_slash) {
            topic.push(c);
        }
        previous_slash = slash;
    }
    topic
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }
    options.set_last_will(LastWill::new(
        join_topic(&config.topic_prefix, "status"),
        STATUS_OFFLINE,
        qos_from_level(config.qos),
        true,
    ));
    options
}

/// Messages the client could not queue yet, oldest first. Bounded so a long
/// broker outage cannot exhaust memory; the oldest entries go first.
#[derive(Debug, Default)]
struct Backlog {
    messages: VecDeque<OutboundMessage>,
    dropped: u64,
}

impl Backlog {
    fn push(&mut self, message: OutboundMessage) {
        if self.messages.len() >= MAX_BACKLOG {
            self.messages.pop_front();
            self.dropped += 1;
            if self.dropped % 1000 == 1 {
                warn!(dropped = self.dropped, "MQTT backlog full, dropping oldest messages");
            }
        }
        self.messages.push_back(message);
    }

    /// Sends from the front until `send` refuses a message.
    fn flush<F>(&mut self, mut send: F)
    where
        F: FnMut(&OutboundMessage) -> bool,
    {
        while let Some(message) = self.messages.front() {
            if !send(message) {
                break;
            }
            self.messages.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.messages.len()
    }

    fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn try_send(client: &AsyncClient, qos: QoS, message: &OutboundMessage) -> bool {
    debug!(topic = %message.topic, payload = %message.payload, "Publishing");
    client
        .try_publish(
            message.topic.as_str(),
            qos,
            message.retain,
            message.payload.as_bytes(),
        )
        .is_ok()
}

/// Forwards [`OutboundMessage`]s from a channel to the MQTT broker.
///
/// Connection handling is left to the rumqttc event loop. When its request
/// queue is full, during a broker outage for instance, messages wait in a
/// backlog that is flushed in order on reconnect.
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    status_topic: String,
    backlog: Backlog,
}

impl MqttPublisher {
    /// Connects to the broker and starts publishing.
    ///
    /// Returns the sender for outbound messages and a handle that completes
    /// once every sender is dropped and the client has gone offline.
    pub fn start(config: &MqttConfig, version: &str) -> (Sender<OutboundMessage>, JoinHandle<()>) {
        info!(
            broker = %config.broker,
            port = config.port,
            client_id = %config.client_id,
            "Starting MQTT publisher"
        );

        let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
        let mut publisher = Self {
            client,
            qos: qos_from_level(config.qos),
            status_topic: join_topic(&config.topic_prefix, "status"),
            backlog: Backlog::default(),
        };
        publisher.publish(OutboundMessage::new(
            join_topic(&config.topic_prefix, "sw-version"),
            format!("main={version}"),
            true,
        ));

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = tokio::spawn(async move {
            publisher.run(eventloop, rx).await;
        });
        (tx, handle)
    }

    async fn run(mut self, eventloop: EventLoop, mut messages: Receiver<OutboundMessage>) {
        let stop = CancellationToken::new();
        let connected = Arc::new(Notify::new());
        let mut driver = tokio::spawn(Self::drive_event_loop(
            eventloop,
            self.client.clone(),
            self.status_topic.clone(),
            self.qos,
            connected.clone(),
            stop.clone(),
        ));

        let mut retry = tokio::time::interval(RETRY_INTERVAL);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => self.publish(message),
                    None => break,
                },
                _ = connected.notified() => self.flush_backlog(),
                _ = retry.tick() => self.flush_backlog(),
            }
        }

        debug!("Outbound channel closed, going offline");
        self.publish(OutboundMessage::new(
            self.status_topic.clone(),
            STATUS_OFFLINE,
            true,
        ));
        tokio::time::sleep(DRAIN_DELAY).await;
        self.flush_backlog();
        if !self.backlog.is_empty() {
            warn!(pending = self.backlog.len(), "Unsent MQTT messages discarded");
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "MQTT disconnect failed");
        }
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut driver).await.is_err() {
            stop.cancel();
            let _ = driver.await;
        }
        info!("MQTT publisher stopped");
    }

    /// Queues `message` behind any backlog, keeping publish order.
    fn publish(&mut self, message: OutboundMessage) {
        self.flush_backlog();
        if self.backlog.is_empty() && try_send(&self.client, self.qos, &message) {
            return;
        }
        if self.backlog.is_empty() {
            warn!(topic = %message.topic, "MQTT request queue full, buffering");
        }
        self.backlog.push(message);
    }

    fn flush_backlog(&mut self) {
        let (client, qos) = (&self.client, self.qos);
        self.backlog.flush(|message| try_send(client, qos, message));
    }

    /// Polls the event loop, which keeps the connection alive and reconnects.
    async fn drive_event_loop(
        mut eventloop: EventLoop,
        client: AsyncClient,
        status_topic: String,
        qos: QoS,
        connected: Arc<Notify>,
        stop: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        let topic = status_topic.as_str();
                        if let Err(e) = client.try_publish(topic, qos, true, STATUS_ONLINE) {
                            warn!(error = %e, "Failed to queue online status");
                        }
                        connected.notify_one();
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "MQTT connection error");
                        tokio::select! {
                            _ = stop.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }
    }
}
