//! # Queue Bridge
//!
//! Best-effort hand-off of message events to a durable queue, plus the one
//! consumer that processes them downstream.
//!
//! The bridge owns a single connection/channel pair shared by every
//! publisher and the consumer. Publishing never fails the caller: when the
//! queue is unreachable it makes one reconnect attempt, logs, and gives up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub mod broker;
pub mod kafka;
pub mod memory;

pub use broker::{Broker, BrokerChannel, BrokerConnection, Delivery, DisabledBroker};
pub use kafka::{KafkaBroker, KafkaSettings};
pub use memory::InMemoryBroker;

use crate::config::{QueueBackend, QueueConfig};
use crate::metrics;
use crate::models::MessageView;

pub const NEW_MESSAGE_EVENT: &str = "NEW_MESSAGE";

const RESUBSCRIBE_MIN_DELAY: Duration = Duration::from_millis(100);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue transport error: {0}")]
    Transport(String),

    #[error("queue channel is closed")]
    ChannelUnavailable,

    #[error("queue payload codec error: {0}")]
    Codec(String),

    #[error("queue operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Payload published for every persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub message: MessageView,
}

impl QueueEvent {
    pub fn new_message(message: MessageView) -> Self {
        Self {
            kind: NEW_MESSAGE_EVENT.to_string(),
            timestamp: Utc::now(),
            message,
        }
    }

    /// Partition key. Keeps one receiver's events in order.
    fn key(&self) -> String {
        self.message.message.receiver_id.to_string()
    }

    fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Codec(e.to_string()))
    }

    fn decode(payload: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(payload).map_err(|e| QueueError::Codec(e.to_string()))
    }
}

/// Downstream processing of consumed events. An `Err` leaves the item
/// unacknowledged so the broker delivers it again.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, event: QueueEvent) -> anyhow::Result<()>;
}

/// Default consumer: records each event in the log.
pub struct LoggingHandler;

#[async_trait]
impl QueueHandler for LoggingHandler {
    async fn handle(&self, event: QueueEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_type = %event.kind,
            message_id = %event.message.message.id,
            sender_id = %event.message.message.sender_id,
            receiver_id = %event.message.message.receiver_id,
            "consumed queue event"
        );
        Ok(())
    }
}

struct Link {
    connection: Box<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
}

pub struct QueueBridge {
    broker: Arc<dyn Broker>,
    queue_name: String,
    timeout: Duration,
    link: Mutex<Option<Link>>,
    consumer_stopped: AtomicBool,
}

impl QueueBridge {
    pub fn new(broker: Arc<dyn Broker>, queue_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            broker,
            queue_name: queue_name.into(),
            timeout,
            link: Mutex::new(None),
            consumer_stopped: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        let broker: Arc<dyn Broker> = match config.backend {
            QueueBackend::Kafka => Arc::new(KafkaBroker::new(KafkaSettings::from_config(config))),
            QueueBackend::Memory => Arc::new(InMemoryBroker::new()),
            QueueBackend::Disabled => Arc::new(DisabledBroker),
        };
        Self::new(broker, config.queue_name.clone(), config.connect_timeout)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Opens the link and declares the durable queue. Idempotent. Returns
    /// whether the bridge is connected afterwards; failure is only logged.
    pub async fn connect(&self) -> bool {
        let mut slot = self.link.lock().await;
        self.ensure_link(&mut slot).await.is_some()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Publishes `event` as a persistent message. Never returns an error:
    /// unavailability and transport failures are logged and counted.
    pub async fn publish(&self, event: &QueueEvent) {
        let message_id = event.message.message.id;

        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%message_id, error = %e, "failed to encode queue event");
                metrics::QUEUE_PUBLISH_TOTAL.with_label_values(&["failed"]).inc();
                return;
            }
        };

        let channel = {
            let mut slot = self.link.lock().await;
            self.ensure_link(&mut slot).await
        };

        let Some(channel) = channel else {
            tracing::warn!(
                queue = %self.queue_name,
                %message_id,
                "queue unavailable, event not published"
            );
            metrics::QUEUE_PUBLISH_TOTAL
                .with_label_values(&["unavailable"])
                .inc();
            return;
        };

        let key = event.key();
        match self
            .bounded(channel.publish(&self.queue_name, &key, payload, true))
            .await
        {
            Ok(()) => {
                tracing::debug!(queue = %self.queue_name, %message_id, "event published");
                metrics::QUEUE_PUBLISH_TOTAL.with_label_values(&["ok"]).inc();
            }
            Err(e) => {
                tracing::warn!(
                    queue = %self.queue_name,
                    %message_id,
                    error = %e,
                    "queue publish failed"
                );
                metrics::QUEUE_PUBLISH_TOTAL.with_label_values(&["failed"]).inc();
                self.discard_link(&channel).await;
            }
        }
    }

    /// Starts the consumer worker. Each item is decoded and handed to
    /// `handler`; it is acknowledged only after the handler succeeds.
    ///
    /// Fails if no channel can be established. That only affects
    /// consumption; publishing keeps its own degraded behaviour. Once
    /// started, the worker resubscribes whenever its channel is lost (for
    /// example after a failed publish drops the shared link) and only stops
    /// on `close`.
    pub async fn consume(
        self: &Arc<Self>,
        handler: Arc<dyn QueueHandler>,
    ) -> Result<JoinHandle<()>, QueueError> {
        self.consumer_stopped.store(false, Ordering::SeqCst);
        let deliveries = self.subscribe().await?;
        let bridge = self.clone();

        Ok(tokio::spawn(async move {
            bridge.run_consumer(deliveries, handler).await;
        }))
    }

    /// Closes channel then connection. Either failing is logged; the link is
    /// cleared regardless. Also stops the consumer worker. Safe to call
    /// repeatedly.
    pub async fn close(&self) {
        self.consumer_stopped.store(true, Ordering::SeqCst);
        let mut slot = self.link.lock().await;
        let Some(link) = slot.take() else {
            return;
        };
        self.shutdown_link(link).await;
        tracing::info!(queue = %self.queue_name, "queue bridge closed");
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Delivery>, QueueError> {
        let channel = {
            let mut slot = self.link.lock().await;
            if self.consumer_stopped.load(Ordering::SeqCst) {
                return Err(QueueError::ChannelUnavailable);
            }
            self.ensure_link(&mut slot).await
        }
        .ok_or_else(|| QueueError::Unavailable(format!("cannot consume {}", self.queue_name)))?;

        self.bounded(channel.consume(&self.queue_name)).await
    }

    async fn run_consumer(
        &self,
        mut deliveries: mpsc::Receiver<Delivery>,
        handler: Arc<dyn QueueHandler>,
    ) {
        let queue = self.queue_name.as_str();
        tracing::info!(%queue, "queue consumer started");

        'consume: loop {
            while let Some(delivery) = deliveries.recv().await {
                process_delivery(queue, handler.as_ref(), delivery).await;
            }

            let mut delay = RESUBSCRIBE_MIN_DELAY;
            loop {
                if self.consumer_stopped.load(Ordering::SeqCst) {
                    break 'consume;
                }
                tokio::time::sleep(delay).await;
                if self.consumer_stopped.load(Ordering::SeqCst) {
                    break 'consume;
                }

                match self.subscribe().await {
                    Ok(rx) => {
                        tracing::info!(%queue, "queue consumer resubscribed");
                        deliveries = rx;
                        continue 'consume;
                    }
                    Err(e) => {
                        tracing::warn!(%queue, error = %e, retry_in = ?delay, "queue resubscribe failed");
                        delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                    }
                }
            }
        }

        tracing::info!(%queue, "queue consumer stopped");
    }

    async fn ensure_link(&self, slot: &mut Option<Link>) -> Option<Arc<dyn BrokerChannel>> {
        if let Some(link) = slot.as_ref() {
            return Some(link.channel.clone());
        }

        match self.open_link().await {
            Ok(link) => {
                let channel = link.channel.clone();
                *slot = Some(link);
                tracing::info!(
                    broker = self.broker.name(),
                    queue = %self.queue_name,
                    "queue bridge connected"
                );
                Some(channel)
            }
            Err(e) => {
                tracing::warn!(
                    broker = self.broker.name(),
                    queue = %self.queue_name,
                    error = %e,
                    "queue connect failed"
                );
                None
            }
        }
    }

    async fn open_link(&self) -> Result<Link, QueueError> {
        let connection = self.bounded(self.broker.open()).await?;

        let channel = match self.bounded(connection.create_channel()).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        if let Err(e) = self.bounded(channel.declare_queue(&self.queue_name, true)).await {
            self.shutdown_link(Link {
                connection,
                channel,
            })
            .await;
            return Err(e);
        }

        Ok(Link {
            connection,
            channel,
        })
    }

    /// Drops the link if it still uses `channel`, so the next publish reconnects.
    async fn discard_link(&self, channel: &Arc<dyn BrokerChannel>) {
        let mut slot = self.link.lock().await;
        let is_current = slot
            .as_ref()
            .map(|link| Arc::ptr_eq(&link.channel, channel))
            .unwrap_or(false);
        if !is_current {
            return;
        }
        if let Some(link) = slot.take() {
            self.shutdown_link(link).await;
        }
    }

    async fn shutdown_link(&self, link: Link) {
        if let Err(e) = self.bounded(link.channel.close()).await {
            tracing::warn!(queue = %self.queue_name, error = %e, "closing queue channel failed");
        }
        if let Err(e) = self.bounded(link.connection.close()).await {
            tracing::warn!(queue = %self.queue_name, error = %e, "closing queue connection failed");
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| QueueError::Timeout(self.timeout))?
    }
}

async fn process_delivery(queue: &str, handler: &dyn QueueHandler, delivery: Delivery) {
    let event = match QueueEvent::decode(&delivery.payload) {
        Ok(event) => event,
        Err(e) => {
            // Acknowledged so a poison item cannot block the queue.
            tracing::warn!(%queue, error = %e, "dropping undecodable queue item");
            if let Err(e) = delivery.ack().await {
                tracing::warn!(%queue, error = %e, "ack failed");
            }
            return;
        }
    };

    let message_id = event.message.message.id;
    match handler.handle(event).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                tracing::warn!(%queue, %message_id, error = %e, "ack failed");
            }
        }
        Err(e) => {
            tracing::warn!(
                %queue,
                %message_id,
                error = %e,
                "queue handler failed, leaving item unacknowledged"
            );
        }
    }
}
