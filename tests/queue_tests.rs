use std::time::Duration;

use anyhow::Result;
use inventory_notifier::{
    clients::{
        memory::InMemoryQueue,
        queue::{QueueClient, QueueKind},
    },
    errors::QueueError,
    models::message::{Notification, NotificationType},
};
use serde_json::json;
use tokio::time::{Instant, sleep};

const VISIBILITY: Duration = Duration::from_millis(50);

fn low_stock(product_id: &str) -> Notification {
    let payload = json!({"product_id": product_id, "in_stock": 2});
    match payload {
        serde_json::Value::Object(map) => Notification::new(NotificationType::LowStock, map),
        _ => unreachable!(),
    }
}

/// Test: Empty receive waits for the long-poll window and returns nothing
#[tokio::test]
async fn test_empty_receive_times_out_without_error() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 3);

    let start = Instant::now();
    let batch = queue.receive(10, Duration::from_millis(80)).await?;

    assert!(batch.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(75));

    Ok(())
}

/// Test: A long-polling receive wakes up when a message is enqueued
#[tokio::test]
async fn test_long_poll_returns_as_soon_as_message_arrives() -> Result<()> {
    let queue = std::sync::Arc::new(InMemoryQueue::new(VISIBILITY, 3));

    let producer = std::sync::Arc::clone(&queue);
    tokio::spawn(async move {
        sleep(Duration::from_millis(30)).await;
        producer.enqueue(&low_stock("p1")).await
    });

    let start = Instant::now();
    let batch = queue.receive(10, Duration::from_secs(5)).await?;

    assert_eq!(batch.len(), 1);
    assert!(start.elapsed() < Duration::from_secs(2));

    Ok(())
}

/// Test: Received messages are hidden until acknowledged or timed out
#[tokio::test]
async fn test_received_message_is_invisible_to_other_consumers() -> Result<()> {
    let queue = InMemoryQueue::new(Duration::from_secs(30), 3);
    let message_id = queue.enqueue(&low_stock("p1")).await?;

    let first = queue.receive(10, Duration::ZERO).await?;
    let second = queue.receive(10, Duration::ZERO).await?;

    assert_eq!(first.len(), 1);
    assert_eq!(first[0].message.message_id, message_id);
    assert_eq!(first[0].message.receive_count, 1);
    assert!(second.is_empty(), "In-flight message must not be handed out twice");

    let stats = queue.stats().await?;
    assert_eq!(stats.visible, 0);
    assert_eq!(stats.in_flight, 1);

    Ok(())
}

/// Test: Acknowledged messages are removed from the queue
#[tokio::test]
async fn test_acknowledge_deletes_message() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 3);
    queue.enqueue(&low_stock("p1")).await?;

    let batch = queue.receive(10, Duration::ZERO).await?;
    queue.acknowledge(&batch[0].receipt_handle).await?;

    sleep(VISIBILITY * 2).await;

    assert_eq!(queue.stats().await?.depth(), 0);
    assert!(queue.receive(10, Duration::ZERO).await?.is_empty());

    Ok(())
}

/// Test: Unacknowledged messages come back with an incremented receive count
#[tokio::test]
async fn test_visibility_timeout_redelivers_with_higher_receive_count() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 3);
    let message_id = queue.enqueue(&low_stock("p1")).await?;

    let first = queue.receive(10, Duration::ZERO).await?;
    let second = queue.receive(10, Duration::from_millis(500)).await?;

    assert_eq!(second.len(), 1);
    assert_eq!(second[0].message.message_id, message_id);
    assert_eq!(second[0].message.body, first[0].message.body);
    assert_eq!(second[0].message.receive_count, 2);
    assert_ne!(second[0].receipt_handle, first[0].receipt_handle);

    Ok(())
}

/// Test: Only the latest receipt handle can acknowledge a redelivered message
#[tokio::test]
async fn test_stale_receipt_handle_fails_acknowledgement() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 3);
    queue.enqueue(&low_stock("p1")).await?;

    let first = queue.receive(10, Duration::ZERO).await?;
    let second = queue.receive(10, Duration::from_millis(500)).await?;

    let stale = queue.acknowledge(&first[0].receipt_handle).await;
    assert!(matches!(stale, Err(QueueError::AckFailed { .. })));

    tokio_test::assert_ok!(queue.acknowledge(&second[0].receipt_handle).await);

    Ok(())
}

/// Test: Messages exceeding max receive count are moved to the dead-letter queue
#[tokio::test]
async fn test_redrive_policy_dead_letters_exhausted_messages() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 2);
    let message_id = queue.enqueue(&low_stock("p1")).await?;

    assert_eq!(queue.receive(10, Duration::ZERO).await?.len(), 1);
    assert_eq!(queue.receive(10, Duration::from_millis(500)).await?.len(), 1);

    let third = queue.receive(10, Duration::from_millis(150)).await?;
    assert!(third.is_empty(), "Exhausted message must not be redelivered");

    let stats = queue.stats().await?;
    assert_eq!(stats.depth(), 0);
    assert_eq!(stats.dead_letters, 1);

    let records = queue.dead_letters(10).await?;
    assert_eq!(records[0].message.message_id, message_id);
    assert_eq!(records[0].message.receive_count, 2);
    assert!(records[0].dead_lettered_at.is_some());

    Ok(())
}

/// Test: Redriven dead letters are delivered again with a fresh receive count
#[tokio::test]
async fn test_redrive_dead_letters_back_to_queue() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 1);
    queue.enqueue(&low_stock("p1")).await?;

    queue.receive(10, Duration::ZERO).await?;
    sleep(VISIBILITY * 2).await;
    assert_eq!(queue.stats().await?.dead_letters, 1);

    assert_eq!(queue.redrive_dead_letters(10).await?, 1);

    let batch = queue.receive(10, Duration::ZERO).await?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].message.receive_count, 1);
    assert_eq!(queue.stats().await?.dead_letters, 0);

    Ok(())
}

/// Test: Batch size caps the number of deliveries per receive
#[tokio::test]
async fn test_receive_respects_max_messages() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 3);
    for i in 0..5 {
        queue.enqueue(&low_stock(&format!("p{}", i))).await?;
    }

    let batch = queue.receive(3, Duration::ZERO).await?;

    assert_eq!(batch.len(), 3);
    assert_eq!(queue.stats().await?.visible, 2);

    Ok(())
}

/// Test: Delayed messages are counted but not delivered before their delay
#[tokio::test]
async fn test_delayed_message_becomes_visible_later() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 3);
    let message_id = queue
        .enqueue_delayed(&low_stock("p1"), Duration::from_millis(100))
        .await?;

    assert!(queue.receive(10, Duration::ZERO).await?.is_empty());
    let stats = queue.stats().await?;
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.visible, 0);

    let batch = queue.receive(10, Duration::from_secs(2)).await?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].message.message_id, message_id);
    assert_eq!(queue.stats().await?.delayed, 0);

    Ok(())
}

/// Test: Purging one queue leaves the other untouched
#[tokio::test]
async fn test_purge_clears_only_the_named_queue() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 1);
    queue.enqueue(&low_stock("p1")).await?;
    queue.receive(10, Duration::ZERO).await?;
    sleep(VISIBILITY * 2).await;

    queue.enqueue(&low_stock("p2")).await?;
    queue
        .enqueue_delayed(&low_stock("p3"), Duration::from_secs(60))
        .await?;
    queue.receive(1, Duration::ZERO).await?;
    queue.enqueue(&low_stock("p4")).await?;

    queue.purge(QueueKind::Notification).await?;

    let stats = queue.stats().await?;
    assert_eq!(stats.depth(), 0);
    assert_eq!(stats.dead_letters, 1);

    queue.purge(QueueKind::DeadLetter).await?;
    assert_eq!(queue.stats().await?.dead_letters, 0);

    Ok(())
}

/// Test: A zero limit neither lists nor redrives dead letters
#[tokio::test]
async fn test_zero_limit_leaves_dead_letters_alone() -> Result<()> {
    let queue = InMemoryQueue::new(VISIBILITY, 1);
    queue.enqueue(&low_stock("p1")).await?;
    queue.receive(10, Duration::ZERO).await?;
    sleep(VISIBILITY * 2).await;

    assert!(queue.dead_letters(0).await?.is_empty());
    assert_eq!(queue.redrive_dead_letters(0).await?, 0);
    assert_eq!(queue.stats().await?.dead_letters, 1);

    Ok(())
}
