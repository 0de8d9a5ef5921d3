use async_trait::async_trait;

use crate::{
    errors::PublishError,
    models::{publish::PublishRequest, subscription::SubscriptionRequest},
};

#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Publishes to the request's topic and returns the publish id.
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError>;

    /// Subscribes an endpoint to `topic`, or updates the filter policy of an
    /// existing subscription. Returns the subscription id.
    async fn subscribe(
        &self,
        topic: &str,
        request: &SubscriptionRequest,
    ) -> Result<String, PublishError>;
}
