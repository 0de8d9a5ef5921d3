use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    ProductCreated,
    ProductUpdated,
    ProductDeleted,
    LowStock,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ProductCreated => "product-created",
            NotificationType::ProductUpdated => "product-updated",
            NotificationType::ProductDeleted => "product-deleted",
            NotificationType::LowStock => "low-stock",
        }
    }

    /// Broadcast types fan out to every subscriber; the rest are targeted
    /// through filter attributes.
    pub fn is_broadcast(&self) -> bool {
        !matches!(self, NotificationType::LowStock)
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }

    pub fn is_normal(&self) -> bool {
        *self == Priority::Normal
    }
}

/// Body of a queued message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub payload: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Priority::is_normal")]
    pub priority: Priority,
}

impl Notification {
    pub fn new(notification_type: NotificationType, payload: Map<String, Value>) -> Self {
        Self {
            notification_type,
            payload,
            priority: Priority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn decode(&self) -> Result<Notification, DispatchError> {
        serde_json::from_str::<Notification>(&self.body)
            .map_err(|e| DispatchError::InvalidMessage(format!("Undecodable body: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: NotificationMessage,
    pub receipt_handle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message: NotificationMessage,
    pub failure_reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message_with_body(body: &str) -> NotificationMessage {
        NotificationMessage {
            message_id: "m-1".to_string(),
            body: body.to_string(),
            receive_count: 1,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn decodes_kebab_case_type() {
        let message =
            message_with_body(r#"{"type":"low-stock","payload":{"product_id":"p1","in_stock":2}}"#);

        let notification = message.decode().unwrap();

        assert_eq!(notification.notification_type, NotificationType::LowStock);
        assert_eq!(notification.payload.get("in_stock"), Some(&json!(2)));
    }

    #[test]
    fn unknown_type_is_invalid() {
        let message = message_with_body(r#"{"type":"price-drop","payload":{}}"#);

        assert!(matches!(
            message.decode(),
            Err(DispatchError::InvalidMessage(_))
        ));
    }

    #[test]
    fn body_round_trips_wire_shape() {
        let mut payload = Map::new();
        payload.insert("product_id".to_string(), json!("p9"));
        let notification = Notification::new(NotificationType::ProductDeleted, payload);

        let body: Value = serde_json::from_str(&notification.to_body().unwrap()).unwrap();

        assert_eq!(body, json!({"type": "product-deleted", "payload": {"product_id": "p9"}}));
    }

    #[test]
    fn priority_defaults_to_normal_and_survives_the_body() {
        let message = message_with_body(r#"{"type":"product-created","payload":{"product_id":"p1"}}"#);
        assert_eq!(message.decode().unwrap().priority, Priority::Normal);

        let urgent = Notification::new(NotificationType::ProductCreated, Map::new())
            .with_priority(Priority::High);
        let decoded = message_with_body(&urgent.to_body().unwrap()).decode().unwrap();

        assert_eq!(decoded.priority, Priority::High);
    }
}
