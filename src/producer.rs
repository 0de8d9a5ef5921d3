use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    clients::queue::QueueClient,
    errors::QueueError,
    models::{
        message::{Notification, NotificationType},
        product::ProductSnapshot,
    },
};

/// Entry point for product handlers. Enqueueing is the only work done on the
/// caller's path; delivery happens in the worker.
#[derive(Clone)]
pub struct NotificationProducer {
    queue: Arc<dyn QueueClient>,
}

impl NotificationProducer {
    pub fn new(queue: Arc<dyn QueueClient>) -> Self {
        Self { queue }
    }

    pub async fn notify(&self, notification: &Notification) -> Result<String, QueueError> {
        self.notify_delayed(notification, Duration::ZERO).await
    }

    /// Queues a notification that becomes visible to the worker after
    /// `delay`, at most [`MAX_DELAY`](crate::clients::queue::MAX_DELAY).
    pub async fn notify_delayed(
        &self,
        notification: &Notification,
        delay: Duration,
    ) -> Result<String, QueueError> {
        let message_id = self.queue.enqueue_delayed(notification, delay).await?;

        debug!(
            message_id = %message_id,
            notification_type = %notification.notification_type,
            priority = notification.priority.as_str(),
            delay_secs = delay.as_secs(),
            "Notification queued"
        );

        Ok(message_id)
    }

    pub async fn product_created(&self, product: &ProductSnapshot) -> Result<String, QueueError> {
        self.notify(&Notification::new(
            NotificationType::ProductCreated,
            product.to_payload(),
        ))
        .await
    }

    /// Queues a `product-updated` notification, followed by `low-stock` when
    /// the product is at or below its reorder level. Returns every message id.
    pub async fn product_updated(
        &self,
        product: &ProductSnapshot,
    ) -> Result<Vec<String>, QueueError> {
        let mut message_ids = vec![
            self.notify(&Notification::new(
                NotificationType::ProductUpdated,
                product.to_payload(),
            ))
            .await?,
        ];

        if product.is_low_stock() {
            message_ids.push(self.low_stock(product).await?);
        }

        Ok(message_ids)
    }

    pub async fn product_deleted(
        &self,
        product_id: &str,
        name: Option<&str>,
    ) -> Result<String, QueueError> {
        let mut payload = Map::new();
        payload.insert("product_id".to_string(), Value::from(product_id));
        if let Some(name) = name {
            payload.insert("name".to_string(), Value::from(name));
        }

        self.notify(&Notification::new(NotificationType::ProductDeleted, payload))
            .await
    }

    pub async fn low_stock(&self, product: &ProductSnapshot) -> Result<String, QueueError> {
        let mut payload = Map::new();
        payload.insert("product_id".to_string(), Value::from(product.product_id.as_str()));
        payload.insert("name".to_string(), Value::from(product.name.as_str()));
        payload.insert(
            "in_stock".to_string(),
            Value::from(product.in_stock.unwrap_or(0)),
        );
        if let Some(level) = product.reorder_level {
            payload.insert("reorder_level".to_string(), Value::from(level));
        }

        self.notify(&Notification::new(NotificationType::LowStock, payload))
            .await
    }

    /// Fire-and-forget enqueue for request paths. Failures are logged, never
    /// returned to the caller.
    pub fn spawn_notify(&self, notification: Notification) -> JoinHandle<()> {
        let producer = self.clone();

        tokio::spawn(async move {
            if let Err(e) = producer.notify(&notification).await {
                warn!(
                    notification_type = %notification.notification_type,
                    error = %e,
                    "Failed to queue notification"
                );
            }
        })
    }
}
