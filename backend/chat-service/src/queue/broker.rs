//! Broker seam used by the queue bridge.
//!
//! A broker hands out a connection, a connection hands out a channel, and a
//! channel declares queues, publishes and consumes. Deliveries carry their
//! own acknowledgement handle.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::QueueError;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name for logs ("kafka", "memory", ...)
    fn name(&self) -> &'static str;

    async fn open(&self) -> Result<Box<dyn BrokerConnection>, QueueError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), QueueError>;

    /// Sends one item. `persistent` asks the broker to keep it across restarts.
    async fn publish(
        &self,
        queue: &str,
        key: &str,
        payload: Vec<u8>,
        persistent: bool,
    ) -> Result<(), QueueError>;

    /// Starts delivering items from `queue`. The receiver ends when the
    /// channel closes.
    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

#[async_trait]
pub trait Acknowledger: Send {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
}

/// One received item. Dropping it without `ack` leaves it unacknowledged.
pub struct Delivery {
    pub payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { payload, acker }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Broker that never connects. Used when the queue is switched off.
pub struct DisabledBroker;

#[async_trait]
impl Broker for DisabledBroker {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn open(&self) -> Result<Box<dyn BrokerConnection>, QueueError> {
        Err(QueueError::Unavailable("queue backend disabled".into()))
    }
}
