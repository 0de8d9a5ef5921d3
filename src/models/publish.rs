use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single publish against a topic. Attributes double as the keys matched by
/// subscription filter policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub subject: String,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
}

impl PublishRequest {
    pub fn new(topic: impl Into<String>, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subject: subject.into(),
            message: message.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
