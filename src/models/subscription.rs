use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::publish::PublishRequest;

pub const AUDIENCE_ALL_SUBSCRIBERS: &str = "all-subscribers";
pub const AUDIENCE_INVENTORY_MANAGERS: &str = "inventory-managers";

/// Which publishes a subscriber should receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriberRole {
    /// Product lifecycle broadcasts only.
    #[default]
    Subscriber,
    /// Broadcasts plus targeted low-stock alerts.
    InventoryManager,
}

impl SubscriberRole {
    pub fn filter_policy(&self) -> Map<String, Value> {
        match self {
            SubscriberRole::Subscriber => audience_filter(&[AUDIENCE_ALL_SUBSCRIBERS]),
            SubscriberRole::InventoryManager => {
                audience_filter(&[AUDIENCE_ALL_SUBSCRIBERS, AUDIENCE_INVENTORY_MANAGERS])
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub endpoint: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_policy: Option<Map<String, Value>>,
}

fn default_protocol() -> String {
    "email".to_string()
}

impl SubscriptionRequest {
    pub fn email(endpoint: impl Into<String>) -> Self {
        Self {
            protocol: default_protocol(),
            endpoint: endpoint.into(),
            filter_policy: None,
        }
    }

    pub fn for_role(endpoint: impl Into<String>, role: SubscriberRole) -> Self {
        Self::email(endpoint).with_filter_policy(role.filter_policy())
    }

    pub fn with_filter_policy(mut self, policy: Map<String, Value>) -> Self {
        self.filter_policy = Some(policy);
        self
    }

    /// Evaluates the filter policy against a publish's attributes. Only exact
    /// string matches are understood, which covers every policy built here.
    pub fn matches(&self, request: &PublishRequest) -> bool {
        let Some(policy) = &self.filter_policy else {
            return true;
        };

        policy.iter().all(|(key, allowed)| {
            let Some(value) = request.attribute(key) else {
                return false;
            };

            match allowed {
                Value::Array(options) => options.iter().any(|option| option.as_str() == Some(value)),
                Value::String(option) => option == value,
                _ => false,
            }
        })
    }
}

pub fn audience_filter(audiences: &[&str]) -> Map<String, Value> {
    let mut policy = Map::new();
    policy.insert(
        "audience".to_string(),
        Value::Array(audiences.iter().map(|a| Value::from(*a)).collect()),
    );
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_for(audience: &str) -> PublishRequest {
        PublishRequest::new("product-notifications", "subject", "body")
            .with_attribute("audience", audience)
    }

    #[test]
    fn managers_receive_targeted_alerts() {
        let manager = SubscriptionRequest::for_role("ops@example.com", SubscriberRole::InventoryManager);
        let customer = SubscriptionRequest::for_role("user@example.com", SubscriberRole::Subscriber);

        assert!(manager.matches(&publish_for(AUDIENCE_INVENTORY_MANAGERS)));
        assert!(manager.matches(&publish_for(AUDIENCE_ALL_SUBSCRIBERS)));
        assert!(!customer.matches(&publish_for(AUDIENCE_INVENTORY_MANAGERS)));
        assert!(customer.matches(&publish_for(AUDIENCE_ALL_SUBSCRIBERS)));
    }

    #[test]
    fn unfiltered_subscription_matches_everything() {
        let subscription = SubscriptionRequest::email("all@example.com");

        assert!(subscription.matches(&PublishRequest::new("t", "s", "m")));
    }

    #[test]
    fn missing_attribute_does_not_match() {
        let subscription = SubscriptionRequest::for_role("a@example.com", SubscriberRole::Subscriber);

        assert!(!subscription.matches(&PublishRequest::new("t", "s", "m")));
    }
}
