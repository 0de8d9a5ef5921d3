use std::{collections::HashMap, sync::Mutex};

use anyhow::{Error, Result};
use async_trait::async_trait;
use aws_sdk_sns::{
    Client,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::MessageAttributeValue,
};
use tracing::{debug, info};

use crate::{
    clients::publisher::TopicPublisher,
    config::Config,
    errors::PublishError,
    models::{publish::PublishRequest, subscription::SubscriptionRequest},
};

const PENDING_CONFIRMATION: &str = "PendingConfirmation";

pub struct SnsTopicPublisher {
    client: Client,
    topic_arns: Mutex<HashMap<String, String>>,
}

impl SnsTopicPublisher {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let mut loader = aws_config::from_env();
        if let Some(region) = &config.aws_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut sns_config = aws_sdk_sns::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.aws_endpoint_url {
            sns_config = sns_config.endpoint_url(endpoint);
        }

        info!(topic = %config.topic_name, "SNS publisher initialized");

        Ok(Self {
            client: Client::from_conf(sns_config.build()),
            topic_arns: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves a topic name to its ARN. `CreateTopic` is idempotent, so it
    /// doubles as a lookup; results are cached for the process lifetime.
    async fn topic_arn(&self, topic: &str) -> Result<String, PublishError> {
        if topic.starts_with("arn:") {
            return Ok(topic.to_string());
        }

        if let Some(arn) = self.cached_arn(topic) {
            return Ok(arn);
        }

        let output = self
            .client
            .create_topic()
            .name(topic)
            .send()
            .await
            .map_err(classify)?;

        let arn = output
            .topic_arn()
            .map(str::to_string)
            .ok_or_else(|| PublishError::Rejected(format!("Topic {} has no ARN", topic)))?;

        debug!(topic, topic_arn = %arn, "Topic ARN resolved");

        self.topic_arns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(topic.to_string(), arn.clone());

        Ok(arn)
    }

    fn cached_arn(&self, topic: &str) -> Option<String> {
        self.topic_arns
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(topic)
            .cloned()
    }

    /// Finds an existing subscription of `endpoint` over `protocol`.
    async fn find_subscription(
        &self,
        topic_arn: &str,
        request: &SubscriptionRequest,
    ) -> Result<Option<String>, PublishError> {
        let mut next_token = None;

        loop {
            let output = self
                .client
                .list_subscriptions_by_topic()
                .topic_arn(topic_arn)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(classify)?;

            let existing = output.subscriptions().iter().find(|subscription| {
                subscription.endpoint() == Some(request.endpoint.as_str())
                    && subscription.protocol() == Some(request.protocol.as_str())
            });

            if let Some(subscription) = existing {
                return Ok(subscription.subscription_arn().map(str::to_string));
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(None),
            }
        }
    }
}

fn classify<E>(error: SdkError<E>) -> PublishError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let permanent = matches!(
        error.code(),
        Some("InvalidParameter" | "InvalidParameterValue" | "AuthorizationError" | "NotFound")
    );

    let message = DisplayErrorContext(&error).to_string();

    if permanent {
        PublishError::Rejected(message)
    } else {
        PublishError::Unavailable(message)
    }
}

#[async_trait]
impl TopicPublisher for SnsTopicPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let topic_arn = self.topic_arn(&request.topic).await?;

        let mut publish = self
            .client
            .publish()
            .topic_arn(&topic_arn)
            .subject(&request.subject)
            .message(&request.message);

        for (key, value) in &request.attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| PublishError::Rejected(e.to_string()))?;
            publish = publish.message_attributes(key, attribute);
        }

        let output = publish.send().await.map_err(classify)?;

        let publish_id = output
            .message_id()
            .map(str::to_string)
            .ok_or_else(|| PublishError::Unavailable("Publish returned no message id".to_string()))?;

        debug!(publish_id = %publish_id, topic_arn = %topic_arn, "Published to topic");

        Ok(publish_id)
    }

    async fn subscribe(
        &self,
        topic: &str,
        request: &SubscriptionRequest,
    ) -> Result<String, PublishError> {
        let topic_arn = self.topic_arn(topic).await?;
        let filter_policy = request
            .filter_policy
            .as_ref()
            .map(|policy| serde_json::Value::Object(policy.clone()).to_string());

        if let Some(subscription_arn) = self.find_subscription(&topic_arn, request).await? {
            match &filter_policy {
                // Attributes cannot be changed until the endpoint confirms.
                Some(_) if subscription_arn == PENDING_CONFIRMATION => {
                    debug!(endpoint = %request.endpoint, "Subscription awaiting confirmation");
                }
                Some(policy) => {
                    self.client
                        .set_subscription_attributes()
                        .subscription_arn(&subscription_arn)
                        .attribute_name("FilterPolicy")
                        .attribute_value(policy)
                        .send()
                        .await
                        .map_err(classify)?;

                    info!(endpoint = %request.endpoint, "Subscription filter policy updated");
                }
                None => {}
            }

            return Ok(subscription_arn);
        }

        let mut subscribe = self
            .client
            .subscribe()
            .topic_arn(&topic_arn)
            .protocol(&request.protocol)
            .endpoint(&request.endpoint)
            .return_subscription_arn(true);

        if let Some(policy) = filter_policy {
            subscribe = subscribe.attributes("FilterPolicy", policy);
        }

        let output = subscribe.send().await.map_err(classify)?;

        let subscription_arn = output
            .subscription_arn()
            .unwrap_or(PENDING_CONFIRMATION)
            .to_string();

        info!(
            topic_arn = %topic_arn,
            protocol = %request.protocol,
            endpoint = %request.endpoint,
            "Endpoint subscribed"
        );

        Ok(subscription_arn)
    }
}
