mod common;

use async_trait::async_trait;
use chat_service::models::{Message, MessageView, UserProfile};
use chat_service::queue::{
    Broker, BrokerConnection, DisabledBroker, InMemoryBroker, QueueBridge, QueueError, QueueEvent,
    QueueHandler,
};
use chrono::Utc;
use common::QUEUE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

fn bridge(broker: &InMemoryBroker) -> Arc<QueueBridge> {
    Arc::new(QueueBridge::new(
        Arc::new(broker.clone()),
        QUEUE,
        Duration::from_millis(500),
    ))
}

fn event(content: &str) -> QueueEvent {
    let sender = UserProfile::new(Uuid::new_v4(), "sender");
    let receiver = UserProfile::new(Uuid::new_v4(), "receiver");
    let message = Message {
        id: Uuid::new_v4(),
        sequence: 1,
        sender_id: sender.id,
        receiver_id: receiver.id,
        content: content.to_string(),
        is_read: false,
        created_at: Utc::now(),
    };
    QueueEvent::new_message(MessageView::new(message, &sender, &receiver))
}

/// Polls `$cond` until it holds, failing the test after two seconds.
macro_rules! eventually {
    ($cond:expr) => {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !($cond) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached within 2s")
    };
}

/// Records handled events; fails them while `failing` is set.
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<Uuid>>,
    failing: AtomicBool,
}

impl RecordingHandler {
    fn failing() -> Self {
        let handler = Self::default();
        handler.failing.store(true, Ordering::SeqCst);
        handler
    }

    async fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl QueueHandler for RecordingHandler {
    async fn handle(&self, event: QueueEvent) -> anyhow::Result<()> {
        self.seen.lock().await.push(event.message.message.id);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("downstream unavailable");
        }
        Ok(())
    }
}

/// Broker whose `open` never completes.
struct HangingBroker;

#[async_trait]
impl Broker for HangingBroker {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn open(&self) -> Result<Box<dyn BrokerConnection>, QueueError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_connect_is_idempotent_and_declares_durable_queue() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);

    assert!(bridge.connect().await);
    assert!(bridge.connect().await);

    assert_eq!(broker.open_count(), 1);
    assert_eq!(broker.is_durable(QUEUE).await, Some(true));
    assert!(bridge.is_connected().await);
}

#[tokio::test]
async fn test_publish_while_unreachable_is_dropped_then_recovers() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    let bridge = bridge(&broker);

    assert!(!bridge.connect().await);
    bridge.publish(&event("lost")).await;
    assert!(broker.published(QUEUE).await.is_empty());

    broker.set_reachable(true);
    bridge.publish(&event("kept")).await;

    let events = broker.published_events(QUEUE).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message.message.content, "kept");
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_transport_failure_discards_link() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);
    assert!(bridge.connect().await);

    broker.set_reachable(false);
    bridge.publish(&event("dropped")).await;
    assert!(!bridge.is_connected().await);

    broker.set_reachable(true);
    bridge.publish(&event("after")).await;

    assert!(bridge.is_connected().await);
    assert_eq!(broker.open_count(), 2);
    assert_eq!(broker.published(QUEUE).await.len(), 1);
}

#[tokio::test]
async fn test_connect_times_out() {
    let bridge = QueueBridge::new(Arc::new(HangingBroker), QUEUE, Duration::from_millis(50));

    assert!(!bridge.connect().await);
    bridge.publish(&event("nowhere")).await;
    assert!(!bridge.is_connected().await);
}

#[tokio::test]
async fn test_disabled_backend_never_connects() {
    let bridge = Arc::new(QueueBridge::new(
        Arc::new(DisabledBroker),
        QUEUE,
        Duration::from_millis(50),
    ));

    assert!(!bridge.connect().await);
    bridge.publish(&event("ignored")).await;
    assert!(matches!(
        bridge.consume(Arc::new(RecordingHandler::default())).await,
        Err(QueueError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_consumer_acks_after_handler_success() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);
    let handler = Arc::new(RecordingHandler::default());
    let worker = bridge.consume(handler.clone()).await.unwrap();

    let sent = event("work");
    bridge.publish(&sent).await;

    eventually!(handler.seen().await == vec![sent.message.message.id]);
    eventually!(broker.pending(QUEUE).await == 0);

    bridge.close().await;
    worker.abort();
}

#[tokio::test]
async fn test_failed_item_is_redelivered() {
    let broker = InMemoryBroker::new();
    let first = bridge(&broker);
    let failing = Arc::new(RecordingHandler::failing());
    let worker = first.consume(failing.clone()).await.unwrap();

    let sent = event("retry me");
    first.publish(&sent).await;

    eventually!(failing.seen().await.len() == 1);
    assert_eq!(broker.pending(QUEUE).await, 1);

    first.close().await;
    worker.abort();

    let second = bridge(&broker);
    let healthy = Arc::new(RecordingHandler::default());
    let worker = second.consume(healthy.clone()).await.unwrap();

    eventually!(healthy.seen().await == vec![sent.message.message.id]);
    eventually!(broker.pending(QUEUE).await == 0);

    second.close().await;
    worker.abort();
}

#[tokio::test]
async fn test_undecodable_item_is_acknowledged() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);
    let handler = Arc::new(RecordingHandler::default());
    let worker = bridge.consume(handler.clone()).await.unwrap();

    broker.inject(QUEUE, b"not json".to_vec()).await;
    let sent = event("valid");
    bridge.publish(&sent).await;

    eventually!(handler.seen().await == vec![sent.message.message.id]);
    eventually!(broker.pending(QUEUE).await == 0);

    bridge.close().await;
    worker.abort();
}

#[tokio::test]
async fn test_consume_fails_when_unreachable() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    let bridge = bridge(&broker);

    let result = bridge.consume(Arc::new(RecordingHandler::default())).await;

    assert!(matches!(result, Err(QueueError::Unavailable(_))));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);

    bridge.close().await;
    assert!(bridge.connect().await);
    bridge.close().await;
    bridge.close().await;

    assert!(!bridge.is_connected().await);
}

#[tokio::test]
async fn test_concurrent_publishers_share_one_link() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.publish(&event(&format!("m{i}"))).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(broker.published(QUEUE).await.len(), 20);
    assert_eq!(broker.open_count(), 1);
}

#[tokio::test]
async fn test_consumer_survives_publish_failure() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);
    let handler = Arc::new(RecordingHandler::default());
    let worker = bridge.consume(handler.clone()).await.unwrap();

    let before = event("before");
    bridge.publish(&before).await;
    eventually!(handler.seen().await == vec![before.message.message.id]);

    broker.set_reachable(false);
    bridge.publish(&event("lost")).await;
    assert!(!bridge.is_connected().await);
    broker.set_reachable(true);

    let after = event("after");
    bridge.publish(&after).await;

    eventually!(handler.seen().await.contains(&after.message.message.id));
    eventually!(broker.pending(QUEUE).await == 0);
    assert!(!worker.is_finished());

    bridge.close().await;
    eventually!(worker.is_finished());
}

#[tokio::test]
async fn test_close_stops_consumer() {
    let broker = InMemoryBroker::new();
    let bridge = bridge(&broker);
    let worker = bridge
        .consume(Arc::new(RecordingHandler::default()))
        .await
        .unwrap();

    bridge.close().await;

    eventually!(worker.is_finished());
    assert!(!bridge.is_connected().await);
}
