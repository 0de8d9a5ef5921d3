use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    errors::QueueError,
    models::{
        message::{DeadLetterRecord, Delivery, Notification},
        stats::QueueStats,
    },
};

/// Longest delivery delay SQS accepts.
pub const MAX_DELAY: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    Notification,
    DeadLetter,
}

/// A work queue with visibility timeouts and a redrive policy to a
/// dead-letter queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueues a notification and returns the queue-assigned message id.
    async fn enqueue(&self, notification: &Notification) -> Result<String, QueueError> {
        self.enqueue_delayed(notification, Duration::ZERO).await
    }

    /// Enqueues a notification that stays invisible for `delay`. Delays above
    /// [`MAX_DELAY`] fail with [`QueueError::InvalidRequest`].
    async fn enqueue_delayed(
        &self,
        notification: &Notification,
        delay: Duration,
    ) -> Result<String, QueueError>;

    /// Long-polls for up to `wait_time`. An empty batch means nothing became
    /// visible in time.
    async fn receive(
        &self,
        max_messages: usize,
        wait_time: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Deletes a delivered message. Fails with [`QueueError::AckFailed`] when
    /// the receipt handle no longer owns the message.
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError>;

    /// Moves up to `limit` dead letters back onto the main queue with a fresh
    /// receive count.
    async fn redrive_dead_letters(&self, limit: usize) -> Result<usize, QueueError>;

    /// Drops every message in one of the two queues, in flight or not.
    async fn purge(&self, queue: QueueKind) -> Result<(), QueueError>;
}

pub(crate) fn check_delay(delay: Duration) -> Result<(), QueueError> {
    if delay > MAX_DELAY {
        return Err(QueueError::InvalidRequest(format!(
            "Delay of {}s exceeds the {}s maximum",
            delay.as_secs(),
            MAX_DELAY.as_secs()
        )));
    }
    Ok(())
}
