//! Kafka-backed broker.
//!
//! "connect" probes cluster metadata, "declare durable queue" creates the
//! topic, publishes go through a `FutureProducer` with `acks=all`, and the
//! consumer commits an offset only when its delivery is acknowledged.

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::broker::{Acknowledger, Broker, BrokerChannel, BrokerConnection, Delivery};
use super::QueueError;
use crate::config::QueueConfig;

const CONSUMER_BUFFER: usize = 16;
const TOPIC_PARTITIONS: i32 = 3;
const TOPIC_REPLICATION: i32 = 1;

#[derive(Debug, Clone)]
pub struct KafkaSettings {
    pub brokers: String,
    pub group_id: String,
    pub timeout: Duration,
}

impl KafkaSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            brokers: config.brokers.clone(),
            group_id: config.group_id.clone(),
            timeout: config.connect_timeout,
        }
    }
}

pub struct KafkaBroker {
    settings: KafkaSettings,
}

impl KafkaBroker {
    pub fn new(settings: KafkaSettings) -> Self {
        Self { settings }
    }
}

fn transport(e: impl std::fmt::Display) -> QueueError {
    QueueError::Transport(e.to_string())
}

#[async_trait]
impl Broker for KafkaBroker {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn open(&self) -> Result<Box<dyn BrokerConnection>, QueueError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.settings.brokers)
            .create()
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let admin = Arc::new(admin);

        // Client creation never touches the network; fetching metadata does.
        let probe = admin.clone();
        let timeout = self.settings.timeout;
        tokio::task::spawn_blocking(move || probe.inner().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(transport)?
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        tracing::debug!(brokers = %self.settings.brokers, "kafka reachable");

        Ok(Box::new(KafkaConnection {
            admin,
            settings: self.settings.clone(),
        }))
    }
}

struct KafkaConnection {
    admin: Arc<AdminClient<DefaultClientContext>>,
    settings: KafkaSettings,
}

#[async_trait]
impl BrokerConnection for KafkaConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.settings.brokers)
            .set("message.timeout.ms", self.settings.timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(transport)?;

        Ok(Arc::new(KafkaChannel {
            admin: self.admin.clone(),
            producer,
            settings: self.settings.clone(),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        // The admin client disconnects when the last reference drops.
        Ok(())
    }
}

struct KafkaChannel {
    admin: Arc<AdminClient<DefaultClientContext>>,
    producer: FutureProducer,
    settings: KafkaSettings,
    closed: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl KafkaChannel {
    fn check_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ChannelUnavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for KafkaChannel {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), QueueError> {
        self.check_open()?;
        // Kafka topics are always persisted; `durable` needs no mapping.
        let topic = NewTopic::new(queue, TOPIC_PARTITIONS, TopicReplication::Fixed(TOPIC_REPLICATION));
        let options = AdminOptions::new().operation_timeout(Some(self.settings.timeout));

        let results = self
            .admin
            .create_topics([&topic], &options)
            .await
            .map_err(transport)?;

        for result in results {
            match result {
                Ok(name) => tracing::info!(topic = %name, durable, "topic created"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(QueueError::Transport(format!("create topic {name}: {code}")))
                }
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        key: &str,
        payload: Vec<u8>,
        _persistent: bool,
    ) -> Result<(), QueueError> {
        self.check_open()?;
        let record = FutureRecord::to(queue).key(key).payload(&payload);
        self.producer
            .send(record, self.settings.timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| transport(e))
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, QueueError> {
        self.check_open()?;
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.settings.brokers)
            .set("group.id", &self.settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(transport)?;
        consumer.subscribe(&[queue]).map_err(transport)?;
        let consumer = Arc::new(consumer);

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let topic = queue.to_string();

        let task = tokio::spawn(async move {
            loop {
                let received = consumer.recv().await.map(|message| {
                    (
                        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        message.partition(),
                        message.offset(),
                    )
                });
                let (payload, partition, offset) = match received {
                    Ok(parts) => parts,
                    Err(e) => {
                        tracing::warn!(%topic, error = %e, "kafka recv failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let acker = KafkaAck {
                    consumer: consumer.clone(),
                    topic: topic.clone(),
                    partition,
                    offset,
                };
                if tx.send(Delivery::new(payload, Box::new(acker))).await.is_err() {
                    break;
                }
            }
        });

        self.consumers.lock().await.push(task);
        Ok(rx)
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for task in std::mem::take(&mut *self.consumers.lock().await) {
            task.abort();
        }
        let producer = self.producer.clone();
        let timeout = self.settings.timeout;
        tokio::task::spawn_blocking(move || {
            use rdkafka::producer::Producer;
            producer.flush(timeout)
        })
        .await
        .map_err(transport)?
        .map_err(transport)
    }
}

struct KafkaAck {
    consumer: Arc<StreamConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl Acknowledger for KafkaAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .map_err(transport)?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(transport)
    }
}
