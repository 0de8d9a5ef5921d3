//! In-process queue and topic with the same delivery semantics as the managed
//! services: visibility timeouts, delivery delays, receive counts, redrive to
//! a dead-letter queue. The queue backs local runs (`QUEUE_BACKEND=memory`);
//! the recording topic is a test double. Contents are lost on restart.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::Notify,
    time::{Instant, timeout_at},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        publisher::TopicPublisher,
        queue::{QueueClient, QueueKind, check_delay},
    },
    config::Config,
    errors::{PublishError, QueueError},
    models::{
        message::{DeadLetterRecord, Delivery, Notification, NotificationMessage},
        publish::PublishRequest,
        stats::QueueStats,
        subscription::SubscriptionRequest,
    },
};

struct InFlight {
    message: NotificationMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<NotificationMessage>,
    delayed: Vec<(Instant, NotificationMessage)>,
    in_flight: HashMap<String, InFlight>,
    dead_letters: VecDeque<DeadLetterRecord>,
}

impl QueueState {
    /// Makes expired in-flight messages visible again, dead-lettering those
    /// that already used up their receives. Returns how many became visible.
    fn release_expired(&mut self, now: Instant, max_receive_count: u32) -> usize {
        let mut released = 0;

        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delayed)
            .into_iter()
            .partition(|(visible_at, _)| *visible_at <= now);
        self.delayed = pending;
        for (_, message) in due {
            self.ready.push_back(message);
            released += 1;
        }

        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            let Some(flight) = self.in_flight.remove(&handle) else {
                continue;
            };

            if flight.message.receive_count >= max_receive_count {
                warn!(
                    message_id = %flight.message.message_id,
                    receive_count = flight.message.receive_count,
                    "Message exceeded max receive count, moving to dead-letter queue"
                );
                self.dead_letters.push_back(DeadLetterRecord {
                    failure_reason: format!(
                        "Exceeded max receive count of {}",
                        max_receive_count
                    ),
                    dead_lettered_at: Some(Utc::now()),
                    message: flight.message,
                });
            } else {
                self.ready.push_back(flight.message);
                released += 1;
            }
        }

        released
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight
            .values()
            .map(|flight| flight.visible_at)
            .chain(self.delayed.iter().map(|(visible_at, _)| *visible_at))
            .min()
    }
}

pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    available: Notify,
    visibility_timeout: Duration,
    max_receive_count: u32,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration, max_receive_count: u32) -> Self {
        info!(
            visibility_timeout_ms = visibility_timeout.as_millis() as u64,
            max_receive_count, "In-memory queue initialized"
        );

        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            visibility_timeout,
            max_receive_count,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.visibility_timeout(), config.max_receive_count)
    }

    /// Enqueues a body verbatim, bypassing notification encoding.
    pub fn enqueue_raw(&self, body: impl Into<String>) -> String {
        self.push(body.into(), Duration::ZERO)
    }

    fn push(&self, body: String, delay: Duration) -> String {
        let message = NotificationMessage {
            message_id: Uuid::new_v4().to_string(),
            body,
            receive_count: 0,
            enqueued_at: Utc::now(),
        };
        let message_id = message.message_id.clone();

        {
            let mut state = self.state();
            if delay.is_zero() {
                state.ready.push_back(message);
            } else {
                state.delayed.push((Instant::now() + delay, message));
            }
        }
        // Wakes a long poll either way so it can re-arm on the new expiry.
        self.available.notify_one();

        message_id
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn enqueue_delayed(
        &self,
        notification: &Notification,
        delay: Duration,
    ) -> Result<String, QueueError> {
        check_delay(delay)?;

        let body = notification.to_body()?;
        let message_id = self.push(body, delay);

        debug!(
            message_id = %message_id,
            notification_type = %notification.notification_type,
            delay_secs = delay.as_secs(),
            "Notification enqueued"
        );

        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait_time: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + wait_time;

        loop {
            let (batch, next_expiry) = {
                let mut state = self.state();
                let now = Instant::now();
                state.release_expired(now, self.max_receive_count);

                let mut batch = Vec::new();
                while batch.len() < max_messages {
                    let Some(mut message) = state.ready.pop_front() else {
                        break;
                    };

                    message.receive_count += 1;
                    let receipt_handle = Uuid::new_v4().to_string();

                    state.in_flight.insert(
                        receipt_handle.clone(),
                        InFlight {
                            message: message.clone(),
                            visible_at: now + self.visibility_timeout,
                        },
                    );
                    batch.push(Delivery {
                        message,
                        receipt_handle,
                    });
                }

                (batch, state.next_expiry())
            };

            if !batch.is_empty() {
                return Ok(batch);
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = match next_expiry {
                Some(expiry) => expiry.min(deadline),
                None => deadline,
            };

            let _ = timeout_at(wake_at, self.available.notified()).await;
        }
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state();
        state.release_expired(Instant::now(), self.max_receive_count);

        match state.in_flight.remove(receipt_handle) {
            Some(flight) => {
                debug!(message_id = %flight.message.message_id, "Message acknowledged");
                Ok(())
            }
            None => Err(QueueError::AckFailed {
                receipt_handle: receipt_handle.to_string(),
            }),
        }
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut state = self.state();
        state.release_expired(Instant::now(), self.max_receive_count);

        Ok(QueueStats {
            visible: state.ready.len() as u64,
            in_flight: state.in_flight.len() as u64,
            delayed: state.delayed.len() as u64,
            dead_letters: state.dead_letters.len() as u64,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        let mut state = self.state();
        state.release_expired(Instant::now(), self.max_receive_count);

        Ok(state.dead_letters.iter().take(limit).cloned().collect())
    }

    async fn redrive_dead_letters(&self, limit: usize) -> Result<usize, QueueError> {
        let mut redriven = 0;

        {
            let mut state = self.state();
            while redriven < limit {
                let Some(record) = state.dead_letters.pop_front() else {
                    break;
                };

                let mut message = record.message;
                message.receive_count = 0;
                state.ready.push_back(message);
                redriven += 1;
            }
        }

        if redriven > 0 {
            info!(redriven, "Dead letters moved back to the notification queue");
            self.available.notify_one();
        }

        Ok(redriven)
    }

    async fn purge(&self, queue: QueueKind) -> Result<(), QueueError> {
        let mut state = self.state();

        let purged = match queue {
            QueueKind::Notification => {
                let purged = state.ready.len() + state.delayed.len() + state.in_flight.len();
                state.ready.clear();
                state.delayed.clear();
                state.in_flight.clear();
                purged
            }
            QueueKind::DeadLetter => {
                let purged = state.dead_letters.len();
                state.dead_letters.clear();
                purged
            }
        };

        warn!(queue = ?queue, purged, "Queue purged");

        Ok(())
    }
}

/// Topic that records every publish and subscription for inspection. Can be
/// told to fail the next publishes to simulate an outage. Records are never
/// dropped; long-running processes use [`LogTopic`](crate::clients::log::LogTopic).
#[derive(Default)]
pub struct InMemoryTopic {
    published: Mutex<Vec<PublishRequest>>,
    subscriptions: Mutex<Vec<SubscriptionRequest>>,
    failures_remaining: AtomicU32,
}

impl InMemoryTopic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, publishes: u32) {
        self.failures_remaining.store(publishes, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionRequest> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publishes whose attributes pass `endpoint`'s filter policy.
    pub fn deliveries_for(&self, endpoint: &str) -> Vec<PublishRequest> {
        let subscriptions = self.subscriptions();
        let Some(subscription) = subscriptions.iter().find(|s| s.endpoint == endpoint) else {
            return Vec::new();
        };

        self.published()
            .into_iter()
            .filter(|request| subscription.matches(request))
            .collect()
    }
}

#[async_trait]
impl TopicPublisher for InMemoryTopic {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let simulated_failure = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        if simulated_failure {
            return Err(PublishError::Unavailable(
                "Simulated topic outage".to_string(),
            ));
        }

        let publish_id = Uuid::new_v4().to_string();

        info!(
            publish_id = %publish_id,
            topic = %request.topic,
            subject = %request.subject,
            attributes = ?request.attributes,
            "Notification published"
        );

        self.published
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        Ok(publish_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        request: &SubscriptionRequest,
    ) -> Result<String, PublishError> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Same endpoint and protocol replaces the earlier filter policy.
        subscriptions.retain(|existing| {
            existing.endpoint != request.endpoint || existing.protocol != request.protocol
        });
        subscriptions.push(request.clone());

        Ok(format!("{}:{}", topic, request.endpoint))
    }
}
