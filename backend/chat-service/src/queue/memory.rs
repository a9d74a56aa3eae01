//! In-process broker.
//!
//! Same at-least-once contract as a real broker: items handed to a
//! consumer stay unacknowledged until acked, and go back to the head of
//! the queue when their channel closes.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use super::broker::{Acknowledger, Broker, BrokerChannel, BrokerConnection, Delivery};
use super::{QueueError, QueueEvent};

const CONSUMER_BUFFER: usize = 16;

#[derive(Default)]
struct QueueState {
    durable: bool,
    next_tag: u64,
    ready: VecDeque<(u64, Vec<u8>)>,
    unacked: BTreeMap<u64, Vec<u8>>,
    published: Vec<Vec<u8>>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn enqueue(&mut self, payload: Vec<u8>) {
        self.next_tag += 1;
        self.ready.push_back((self.next_tag, payload));
        self.notify.notify_one();
    }

    fn requeue_unacked(&mut self) {
        let unacked = std::mem::take(&mut self.unacked);
        for (tag, payload) in unacked.into_iter().rev() {
            self.ready.push_front((tag, payload));
        }
        if !self.ready.is_empty() {
            self.notify.notify_one();
        }
    }
}

#[derive(Default)]
struct BrokerState {
    unreachable: AtomicBool,
    opened: AtomicUsize,
    queues: Mutex<HashMap<String, QueueState>>,
}

/// Cloneable handle; clones share the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unreachable, `open` and `publish` fail like a downed broker.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Everything ever published to `queue`, in order.
    pub async fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        let queues = self.state.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.published.clone())
            .unwrap_or_default()
    }

    pub async fn published_events(&self, queue: &str) -> Vec<QueueEvent> {
        self.published(queue)
            .await
            .iter()
            .filter_map(|p| serde_json::from_slice(p).ok())
            .collect()
    }

    /// Items not yet acknowledged (waiting or in flight).
    pub async fn pending(&self, queue: &str) -> usize {
        let queues = self.state.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.ready.len() + q.unacked.len())
            .unwrap_or(0)
    }

    pub async fn is_durable(&self, queue: &str) -> Option<bool> {
        self.state.queues.lock().await.get(queue).map(|q| q.durable)
    }

    /// Puts a raw payload on `queue`, bypassing any channel.
    pub async fn inject(&self, queue: &str, payload: Vec<u8>) {
        let mut queues = self.state.queues.lock().await;
        queues.entry(queue.to_string()).or_default().enqueue(payload);
    }

    fn check_reachable(&self) -> Result<(), QueueError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory broker unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> Result<Box<dyn BrokerConnection>, QueueError> {
        self.check_reachable()?;
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    broker: InMemoryBroker,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ChannelUnavailable);
        }
        self.broker.check_reachable()?;
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryChannel {
    broker: InMemoryBroker,
    closed: AtomicBool,
    consumers: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ChannelUnavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), QueueError> {
        self.check_open()?;
        let mut queues = self.broker.state.queues.lock().await;
        queues.entry(queue.to_string()).or_default().durable = durable;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        _key: &str,
        payload: Vec<u8>,
        _persistent: bool,
    ) -> Result<(), QueueError> {
        self.check_open()?;
        if self.broker.check_reachable().is_err() {
            return Err(QueueError::Transport("connection reset".into()));
        }
        let mut queues = self.broker.state.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.published.push(payload.clone());
        state.enqueue(payload);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>, QueueError> {
        self.check_open()?;
        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        let state = self.broker.state.clone();
        let name = queue.to_string();

        let pump = tokio::spawn(async move {
            loop {
                let (next, notify) = {
                    let mut queues = state.queues.lock().await;
                    let q = queues.entry(name.clone()).or_default();
                    let next = q.ready.pop_front();
                    if let Some((tag, payload)) = &next {
                        q.unacked.insert(*tag, payload.clone());
                    }
                    (next, q.notify.clone())
                };

                match next {
                    Some((tag, payload)) => {
                        let acker = MemoryAck {
                            state: state.clone(),
                            queue: name.clone(),
                            tag,
                        };
                        if tx.send(Delivery::new(payload, Box::new(acker))).await.is_err() {
                            break;
                        }
                    }
                    None => notify.notified().await,
                }
            }
        });

        self.consumers.lock().await.push((queue.to_string(), pump));
        Ok(rx)
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let consumers = std::mem::take(&mut *self.consumers.lock().await);
        let mut queues = self.broker.state.queues.lock().await;
        for (queue, pump) in consumers {
            pump.abort();
            if let Some(q) = queues.get_mut(&queue) {
                q.requeue_unacked();
            }
        }
        Ok(())
    }
}

struct MemoryAck {
    state: Arc<BrokerState>,
    queue: String,
    tag: u64,
}

#[async_trait]
impl Acknowledger for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut queues = self.state.queues.lock().await;
        queues
            .get_mut(&self.queue)
            .and_then(|q| q.unacked.remove(&self.tag))
            .map(|_| ())
            .ok_or(QueueError::ChannelUnavailable)
    }
}
