use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use inventory_notifier::{
    clients::{
        memory::{InMemoryQueue, InMemoryTopic},
        publisher::TopicPublisher,
        queue::QueueClient,
    },
    dispatcher::NotificationDispatcher,
    errors::PublishError,
    models::{
        product::ProductSnapshot, publish::PublishRequest, retry::RetryConfig, stats::WorkerStats,
        subscription::SubscriptionRequest,
    },
    producer::NotificationProducer,
    worker::{NotificationWorker, WorkerConfig},
};
use tokio::{sync::Notify, time::sleep};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "product-notifications";
const VISIBILITY: Duration = Duration::from_millis(50);

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2,
    }
}

fn worker_config(max_receive_count: u32) -> WorkerConfig {
    WorkerConfig {
        batch_size: 10,
        wait_time: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        max_receive_count,
        concurrency: 4,
    }
}

fn worker(
    queue: &Arc<InMemoryQueue>,
    publisher: Arc<dyn TopicPublisher>,
    max_receive_count: u32,
) -> NotificationWorker {
    NotificationWorker::new(
        queue.clone(),
        Arc::new(NotificationDispatcher::new(publisher, TOPIC, fast_retry())),
        worker_config(max_receive_count),
        Arc::new(WorkerStats::new()),
    )
}

/// Publisher that takes a while and signals when the first publish starts.
struct SlowTopic {
    started: Notify,
    delay: Duration,
    published: Mutex<Vec<PublishRequest>>,
    calls: AtomicUsize,
}

impl SlowTopic {
    fn new(delay: Duration) -> Self {
        Self {
            started: Notify::new(),
            delay,
            published: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl TopicPublisher for SlowTopic {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.notify_one();
        }

        sleep(self.delay).await;
        self.published.lock().unwrap().push(request.clone());

        Ok(format!("publish-{}", self.calls.load(Ordering::SeqCst)))
    }

    async fn subscribe(
        &self,
        topic: &str,
        request: &SubscriptionRequest,
    ) -> Result<String, PublishError> {
        Ok(format!("{}:{}", topic, request.endpoint))
    }
}

/// Test: Low-stock update is published as an urgent alert and removed from the queue
#[tokio::test]
async fn test_low_stock_update_is_delivered_and_acknowledged() -> Result<()> {
    let queue = Arc::new(InMemoryQueue::new(VISIBILITY, 3));
    let topic = Arc::new(InMemoryTopic::new());
    let producer = NotificationProducer::new(queue.clone());
    let worker = worker(&queue, topic.clone(), 3);

    let product = ProductSnapshot::new("p1", "Coffee Beans").with_stock(3, 5);
    let message_ids = producer.product_updated(&product).await?;
    assert_eq!(message_ids.len(), 2, "Update below reorder level adds a low-stock alert");

    let report = worker.poll_once().await?;
    assert_eq!(report.received, 2);
    assert_eq!(report.delivered, 2);

    let published = topic.published();
    let alert = published
        .iter()
        .find(|request| request.attribute("notification_type") == Some("low-stock"))
        .ok_or_else(|| anyhow::anyhow!("No low-stock publish"))?;
    assert_eq!(alert.attribute("urgency"), Some("high"));

    sleep(VISIBILITY * 2).await;
    let stats = queue.stats().await?;
    assert_eq!(stats.depth(), 0);
    assert_eq!(stats.dead_letters, 0);

    let snapshot = worker.stats().snapshot("w-1");
    assert_eq!(snapshot.polls, 1);
    assert_eq!(snapshot.delivered, 2);
    assert!(snapshot.last_poll_at.is_some());

    Ok(())
}

/// Test: Invalid messages are dropped once and never redelivered or dead-lettered
#[tokio::test]
async fn test_invalid_message_is_dropped_without_redelivery() -> Result<()> {
    let queue = Arc::new(InMemoryQueue::new(VISIBILITY, 3));
    let topic = Arc::new(InMemoryTopic::new());
    let worker = worker(&queue, topic.clone(), 3);

    queue.enqueue_raw(r#"{"type":"product-updated","payload":{"name":"Mug"}}"#);

    let report = worker.poll_once().await?;
    assert_eq!(report.rejected, 1);
    assert_eq!(topic.publish_count(), 0);

    let again = worker.poll_once().await?;
    assert_eq!(again.received, 0, "Rejected message must not come back");

    let stats = queue.stats().await?;
    assert_eq!(stats.depth(), 0);
    assert_eq!(stats.dead_letters, 0);

    Ok(())
}

/// Test: A message that keeps failing ends up in the dead-letter queue
#[tokio::test]
async fn test_persistent_publish_failure_is_dead_lettered() -> Result<()> {
    let queue = Arc::new(InMemoryQueue::new(VISIBILITY, 2));
    let topic = Arc::new(InMemoryTopic::new());
    topic.fail_next(u32::MAX);
    let producer = NotificationProducer::new(queue.clone());
    let worker = worker(&queue, topic.clone(), 2);

    let message_id = producer
        .low_stock(&ProductSnapshot::new("p1", "Filters").with_stock(0, 4))
        .await?;

    let first = worker.poll_once().await?;
    assert_eq!(first.failed, 1);

    let second = worker.poll_once().await?;
    assert_eq!(second.exhausted, 1, "Final attempt is reported as exhausted");

    let mut dead_letters = Vec::new();
    for _ in 0..10 {
        worker.poll_once().await?;
        dead_letters = queue.dead_letters(10).await?;
        if !dead_letters.is_empty() {
            break;
        }
    }

    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].message.message_id, message_id);
    assert_eq!(queue.stats().await?.depth(), 0);
    assert_eq!(topic.publish_count(), 0);

    Ok(())
}

/// Test: A failed attempt is redelivered and succeeds once the topic recovers
#[tokio::test]
async fn test_redelivery_after_outage_succeeds() -> Result<()> {
    let queue = Arc::new(InMemoryQueue::new(VISIBILITY, 3));
    let topic = Arc::new(InMemoryTopic::new());
    // One full attempt's worth of retries.
    topic.fail_next(3);
    let producer = NotificationProducer::new(queue.clone());
    let worker = worker(&queue, topic.clone(), 3);

    producer
        .product_created(&ProductSnapshot::new("p2", "French Press"))
        .await?;

    assert_eq!(worker.poll_once().await?.failed, 1);
    assert_eq!(worker.poll_once().await?.delivered, 1);
    assert_eq!(topic.publish_count(), 1);
    assert_eq!(queue.stats().await?.dead_letters, 0);

    Ok(())
}

/// Test: Shutdown during a batch lets every in-progress delivery finish
#[tokio::test]
async fn test_shutdown_completes_current_batch() -> Result<()> {
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(30), 3));
    let topic = Arc::new(SlowTopic::new(Duration::from_millis(100)));
    let producer = NotificationProducer::new(queue.clone());
    let worker = Arc::new(worker(&queue, topic.clone(), 3));

    for i in 0..3 {
        producer
            .product_created(&ProductSnapshot::new(format!("p{}", i), "Kettle"))
            .await?;
    }

    let shutdown = CancellationToken::new();
    let running = {
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    topic.started.notified().await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), running).await??;

    assert_eq!(topic.published_count(), 3);
    assert_eq!(queue.stats().await?.depth(), 0);

    Ok(())
}

/// Test: A cancelled worker stops without polling
#[tokio::test]
async fn test_run_returns_when_already_cancelled() -> Result<()> {
    let queue = Arc::new(InMemoryQueue::new(VISIBILITY, 3));
    let worker = worker(&queue, Arc::new(InMemoryTopic::new()), 3);

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), worker.run(shutdown)).await?;
    assert_eq!(worker.stats().snapshot("w-1").polls, 0);

    Ok(())
}
