use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::queue::QueueClient,
    config::Config,
    dispatcher::NotificationDispatcher,
    errors::{DispatchError, QueueError},
    models::{
        message::Delivery,
        stats::{BatchReport, WorkerStats},
        status::MessageOutcome,
    },
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub wait_time: Duration,
    pub poll_interval: Duration,
    pub max_receive_count: u32,
    pub concurrency: usize,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size as usize,
            wait_time: config.wait_time(),
            poll_interval: config.poll_interval(),
            max_receive_count: config.max_receive_count,
            concurrency: config.worker_concurrency,
        }
    }
}

pub struct NotificationWorker {
    queue: Arc<dyn QueueClient>,
    dispatcher: Arc<NotificationDispatcher>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl NotificationWorker {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        dispatcher: Arc<NotificationDispatcher>,
        config: WorkerConfig,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            config,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Polls until `shutdown` is cancelled. Cancellation is only observed
    /// between batches, so a received batch is always processed to the end.
    ///
    /// A long poll already in progress is not interrupted either: stopping
    /// an idle worker can take up to `wait_time` (20s with the default
    /// config). Dropping a receive mid-flight could leave messages it already
    /// took invisible until their visibility timeout expires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            wait_time_secs = self.config.wait_time.as_secs(),
            concurrency = self.config.concurrency,
            "Notification worker started"
        );

        while !shutdown.is_cancelled() {
            match self.poll_once().await {
                Ok(report) => {
                    if report.received > 0 {
                        debug!(
                            received = report.received,
                            delivered = report.delivered,
                            rejected = report.rejected,
                            failed = report.failed,
                            exhausted = report.exhausted,
                            "Batch processed"
                        );
                    } else if self.config.wait_time.is_zero() {
                        self.idle(&shutdown).await;
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_ms = self.config.poll_interval.as_millis() as u64,
                        "Failed to receive from notification queue"
                    );

                    self.idle(&shutdown).await;
                }
            }
        }

        info!("Notification worker stopped");
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    /// Runs one receive cycle: receive a batch, dispatch every delivery with
    /// bounded concurrency, acknowledge what should not come back.
    pub async fn poll_once(&self) -> Result<BatchReport, QueueError> {
        let batch = match self
            .queue
            .receive(self.config.batch_size, self.config.wait_time)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                self.stats.record_poll_error();
                return Err(e);
            }
        };

        self.stats.record_poll(Utc::now());

        let mut report = BatchReport {
            received: batch.len(),
            ..Default::default()
        };

        let outcomes = stream::iter(batch)
            .map(|delivery| self.handle_delivery(delivery))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }

        self.stats.record_batch(&report);

        Ok(report)
    }

    async fn handle_delivery(&self, delivery: Delivery) -> MessageOutcome {
        let message = &delivery.message;

        match self.dispatcher.dispatch(message).await {
            Ok(_) => {
                self.acknowledge(&delivery).await;
                MessageOutcome::Delivered
            }
            Err(DispatchError::InvalidMessage(reason)) => {
                // Retrying cannot fix a malformed message.
                warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    reason = %reason,
                    "Dropping invalid notification"
                );
                self.acknowledge(&delivery).await;
                MessageOutcome::Rejected
            }
            Err(e) if message.receive_count >= self.config.max_receive_count => {
                error!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    max_receive_count = self.config.max_receive_count,
                    error = %e,
                    "Notification failed on its final attempt, queue will dead-letter it"
                );
                MessageOutcome::Exhausted
            }
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    receive_count = message.receive_count,
                    max_receive_count = self.config.max_receive_count,
                    error = %e,
                    "Notification failed, leaving it for redelivery"
                );
                MessageOutcome::Failed
            }
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        match self.queue.acknowledge(&delivery.receipt_handle).await {
            Ok(()) => {}
            Err(QueueError::AckFailed { .. }) => {
                debug!(
                    message_id = %delivery.message.message_id,
                    "Receipt handle went stale before acknowledgement"
                );
            }
            Err(e) => {
                warn!(
                    message_id = %delivery.message.message_id,
                    error = %e,
                    "Failed to acknowledge notification, it may be delivered again"
                );
            }
        }
    }
}
