use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::{
    clients::publisher::TopicPublisher,
    errors::PublishError,
    models::{publish::PublishRequest, subscription::SubscriptionRequest},
};

/// Publisher for local runs without AWS. Every publish is written to the log
/// and nothing is kept.
#[derive(Debug, Default)]
pub struct LogTopic;

impl LogTopic {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TopicPublisher for LogTopic {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let publish_id = Uuid::new_v4().to_string();

        info!(
            publish_id = %publish_id,
            topic = %request.topic,
            subject = %request.subject,
            attributes = ?request.attributes,
            message = %request.message,
            "Notification published"
        );

        Ok(publish_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        request: &SubscriptionRequest,
    ) -> Result<String, PublishError> {
        info!(
            topic,
            protocol = %request.protocol,
            endpoint = %request.endpoint,
            filter_policy = ?request.filter_policy,
            "Subscription registered"
        );

        Ok(format!("{}:{}", topic, request.endpoint))
    }
}
