use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    clients::publisher::TopicPublisher,
    errors::{DispatchError, PublishError},
    models::{
        message::{Notification, NotificationMessage, NotificationType},
        publish::PublishRequest,
        retry::RetryConfig,
        status::DeliveryState,
        subscription::{AUDIENCE_ALL_SUBSCRIBERS, AUDIENCE_INVENTORY_MANAGERS},
    },
    utils::retry_with_backoff_when,
};

/// SNS requires subjects shorter than 100 characters.
const MAX_SUBJECT_CHARS: usize = 99;

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub publish_id: String,
    pub notification_type: NotificationType,
}

pub struct NotificationDispatcher {
    publisher: Arc<dyn TopicPublisher>,
    topic: String,
    retry_config: RetryConfig,
}

impl NotificationDispatcher {
    pub fn new(
        publisher: Arc<dyn TopicPublisher>,
        topic: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            retry_config,
        }
    }

    /// Delivers one message. [`DispatchError::InvalidMessage`] is permanent;
    /// [`DispatchError::PublishUnavailable`] means this attempt failed after
    /// the bounded publish retries. [`DispatchError::PublishRejected`] is
    /// returned without retrying.
    pub async fn dispatch(
        &self,
        message: &NotificationMessage,
    ) -> Result<DispatchReceipt, DispatchError> {
        transition(message, DeliveryState::Received);

        let notification = message.decode()?;
        validate(&notification)?;

        let request = render(&self.topic, &message.message_id, &notification);

        transition(message, DeliveryState::Delivering);

        let published = retry_with_backoff_when(
            &self.retry_config,
            PublishError::is_transient,
            || self.publisher.publish(&request),
        )
        .await;

        match published {
            Ok(publish_id) => {
                transition(message, DeliveryState::Delivered);
                info!(
                    message_id = %message.message_id,
                    publish_id = %publish_id,
                    notification_type = %notification.notification_type,
                    "Notification delivered"
                );
                Ok(DispatchReceipt {
                    publish_id,
                    notification_type: notification.notification_type,
                })
            }
            Err(e) => {
                transition(message, DeliveryState::Failed);
                warn!(
                    message_id = %message.message_id,
                    notification_type = %notification.notification_type,
                    error = %e,
                    "Notification delivery failed"
                );
                Err(e.into())
            }
        }
    }
}

fn transition(message: &NotificationMessage, state: DeliveryState) {
    debug!(
        message_id = %message.message_id,
        receive_count = message.receive_count,
        state = %state,
        "Dispatch state changed"
    );
}

fn validate(notification: &Notification) -> Result<(), DispatchError> {
    let payload = &notification.payload;

    match payload.get("product_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(_) => {
            return Err(DispatchError::InvalidMessage(
                "product_id must be a non-empty string".to_string(),
            ));
        }
        None => {
            return Err(DispatchError::InvalidMessage(
                "Missing required field product_id".to_string(),
            ));
        }
    }

    if notification.notification_type == NotificationType::LowStock
        && !payload.get("in_stock").is_some_and(Value::is_i64)
    {
        return Err(DispatchError::InvalidMessage(
            "low-stock notification requires integer in_stock".to_string(),
        ));
    }

    Ok(())
}

/// Builds the publish for a validated notification. Pure in its inputs, so a
/// redelivered message publishes identical content.
fn render(topic: &str, message_id: &str, notification: &Notification) -> PublishRequest {
    let payload = &notification.payload;
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| payload.get("product_id").and_then(Value::as_str))
        .unwrap_or("Item");

    let (subject, headline) = match notification.notification_type {
        NotificationType::ProductCreated => (
            format!("Product Created: {}", name),
            "PRODUCT CREATED".to_string(),
        ),
        NotificationType::ProductUpdated => (
            format!("Product Updated: {}", name),
            "PRODUCT UPDATED".to_string(),
        ),
        NotificationType::ProductDeleted => (
            format!("Product Deleted: {}", name),
            "PRODUCT DELETED".to_string(),
        ),
        NotificationType::LowStock => (
            format!("Low Stock Alert: {}", name),
            low_stock_headline(name, payload),
        ),
    };

    let message = format!("{}\n\n{}", headline, detail_lines(payload));

    let subject = truncate(&single_line(&subject), MAX_SUBJECT_CHARS);

    let request = PublishRequest::new(topic, subject, message)
        .with_attribute("notification_type", notification.notification_type.as_str())
        .with_attribute("notification_id", message_id)
        .with_attribute("priority", notification.priority.as_str());

    if notification.notification_type.is_broadcast() {
        request.with_attribute("audience", AUDIENCE_ALL_SUBSCRIBERS)
    } else {
        request
            .with_attribute("audience", AUDIENCE_INVENTORY_MANAGERS)
            .with_attribute("urgency", "high")
    }
}

/// Collapses line breaks and other control characters into single spaces.
fn single_line(text: &str) -> String {
    text.split(char::is_control)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn low_stock_headline(name: &str, payload: &Map<String, Value>) -> String {
    let in_stock = payload.get("in_stock").and_then(Value::as_i64).unwrap_or(0);

    match payload.get("reorder_level").and_then(Value::as_i64) {
        Some(level) => format!(
            "LOW STOCK: {} has {} units left (reorder level {})",
            name, in_stock, level
        ),
        None => format!("LOW STOCK: {} has {} units left", name, in_stock),
    }
}

fn detail_lines(payload: &Map<String, Value>) -> String {
    payload
        .iter()
        .map(|(key, value)| format!("{}: {}", title_case(key), display_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "N/A".to_string(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated = text.chars().take(max_chars - 3).collect::<String>();
    truncated.push_str("...");
    truncated
}
