use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_sqs::{
    Client,
    error::{DisplayErrorContext, SdkError},
    operation::delete_message::DeleteMessageError,
    types::{Message, MessageAttributeValue, MessageSystemAttributeName, QueueAttributeName},
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    clients::queue::{QueueClient, QueueKind, check_delay},
    config::Config,
    errors::QueueError,
    models::{
        message::{DeadLetterRecord, Delivery, Notification, NotificationMessage},
        stats::QueueStats,
    },
};

const MESSAGE_RETENTION_SECONDS: &str = "1209600";
const DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS: &str = "60";
const MAX_BATCH: usize = 10;

pub struct SqsQueueClient {
    client: Client,
    queue_url: String,
    dead_letter_queue_url: String,
    max_receive_count: u32,
}

impl SqsQueueClient {
    /// Connects and makes sure both queues exist, the main queue redriving to
    /// the dead-letter queue after `max_receive_count` receives.
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let mut loader = aws_config::from_env();
        if let Some(region) = &config.aws_region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut sqs_config = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.aws_endpoint_url {
            sqs_config = sqs_config.endpoint_url(endpoint);
        }
        let client = Client::from_conf(sqs_config.build());

        info!("Connecting to SQS...");

        let dead_letter_queue_url = client
            .create_queue()
            .queue_name(&config.dead_letter_queue_name)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                DEAD_LETTER_VISIBILITY_TIMEOUT_SECONDS,
            )
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                MESSAGE_RETENTION_SECONDS,
            )
            .send()
            .await
            .map_err(|e| anyhow!("Failed to declare dead-letter queue: {}", DisplayErrorContext(&e)))?
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Dead-letter queue has no URL"))?;

        info!(queue_url = %dead_letter_queue_url, "Dead-letter queue declared");

        let dead_letter_arn = client
            .get_queue_attributes()
            .queue_url(&dead_letter_queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to read dead-letter queue ARN: {}", DisplayErrorContext(&e)))?
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::QueueArn).cloned())
            .ok_or_else(|| anyhow!("Dead-letter queue has no ARN"))?;

        let redrive_policy = json!({
            "deadLetterTargetArn": dead_letter_arn,
            "maxReceiveCount": config.max_receive_count.to_string(),
        })
        .to_string();

        let queue_url = client
            .create_queue()
            .queue_name(&config.notification_queue_name)
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                config.visibility_timeout_seconds.to_string(),
            )
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                MESSAGE_RETENTION_SECONDS,
            )
            .attributes(QueueAttributeName::RedrivePolicy, redrive_policy)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to declare notification queue: {}", DisplayErrorContext(&e)))?
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Notification queue has no URL"))?;

        info!(
            queue_url = %queue_url,
            max_receive_count = config.max_receive_count,
            "Notification queue declared"
        );

        Ok(Self {
            client,
            queue_url,
            dead_letter_queue_url,
            max_receive_count: config.max_receive_count,
        })
    }

    async fn receive_from(
        &self,
        queue_url: &str,
        max_messages: usize,
        wait_time: Duration,
        visibility_timeout: Option<i32>,
    ) -> Result<Vec<Delivery>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages.clamp(1, MAX_BATCH) as i32)
            .wait_time_seconds(wait_time.as_secs().min(20) as i32)
            .set_visibility_timeout(visibility_timeout)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        Ok(output.messages().iter().filter_map(to_delivery).collect())
    }

    async fn receive_dead_letters(
        &self,
        limit: usize,
        visibility_timeout: Option<i32>,
    ) -> Result<Vec<Delivery>, QueueError> {
        let queue_url = self.dead_letter_queue_url.as_str();

        collect_batches(limit, move |max_messages| {
            self.receive_from(queue_url, max_messages, Duration::ZERO, visibility_timeout)
        })
        .await
    }

    fn queue_url(&self, queue: QueueKind) -> &str {
        match queue {
            QueueKind::Notification => &self.queue_url,
            QueueKind::DeadLetter => &self.dead_letter_queue_url,
        }
    }

    async fn attribute_count(
        &self,
        queue_url: &str,
        attribute: QueueAttributeName,
    ) -> Result<u64, QueueError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(attribute.clone())
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .attributes()
            .and_then(|attributes| attributes.get(&attribute))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }
}

fn to_delivery(message: &Message) -> Option<Delivery> {
    let Some(receipt_handle) = message.receipt_handle() else {
        warn!(message_id = ?message.message_id(), "Received message without receipt handle");
        return None;
    };

    let attributes = message.attributes();

    Some(Delivery {
        message: NotificationMessage {
            message_id: message.message_id().unwrap_or_default().to_string(),
            body: message.body().unwrap_or_default().to_string(),
            receive_count: system_attribute(
                attributes,
                MessageSystemAttributeName::ApproximateReceiveCount,
            )
            .unwrap_or(1) as u32,
            enqueued_at: system_attribute(attributes, MessageSystemAttributeName::SentTimestamp)
                .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single())
                .unwrap_or_else(Utc::now),
        },
        receipt_handle: receipt_handle.to_string(),
    })
}

fn system_attribute(
    attributes: Option<&HashMap<MessageSystemAttributeName, String>>,
    name: MessageSystemAttributeName,
) -> Option<u64> {
    attributes?.get(&name)?.parse().ok()
}

/// Receives up to `limit` messages, at most [`MAX_BATCH`] per call, until the
/// limit is met or a call yields nothing new.
async fn collect_batches<F, Fut>(limit: usize, mut fetch: F) -> Result<Vec<Delivery>, QueueError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<Delivery>, QueueError>>,
{
    let mut deliveries: Vec<Delivery> = Vec::new();

    while deliveries.len() < limit {
        let batch = fetch((limit - deliveries.len()).min(MAX_BATCH)).await?;
        let before = deliveries.len();

        for delivery in batch {
            // A zero-visibility peek can hand the same message out again.
            if deliveries
                .iter()
                .all(|seen| seen.message.message_id != delivery.message.message_id)
            {
                deliveries.push(delivery);
            }
        }

        if deliveries.len() == before {
            break;
        }
    }

    deliveries.truncate(limit);
    Ok(deliveries)
}

fn type_attribute(body: &str) -> Option<MessageAttributeValue> {
    let notification = serde_json::from_str::<Notification>(body).ok()?;
    notification_type_attribute(&notification).ok()
}

fn notification_type_attribute(
    notification: &Notification,
) -> Result<MessageAttributeValue, QueueError> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(notification.notification_type.as_str())
        .build()
        .map_err(|e| QueueError::InvalidRequest(e.to_string()))
}

fn is_stale_receipt(error: &SdkError<DeleteMessageError>) -> bool {
    matches!(
        error.as_service_error(),
        Some(DeleteMessageError::ReceiptHandleIsInvalid(_))
            | Some(DeleteMessageError::InvalidIdFormat(_))
    )
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn enqueue_delayed(
        &self,
        notification: &Notification,
        delay: Duration,
    ) -> Result<String, QueueError> {
        check_delay(delay)?;

        let body = notification.to_body()?;

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes(
                "notification_type",
                notification_type_attribute(notification)?,
            )
            .delay_seconds(delay.as_secs() as i32)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        let message_id = output
            .message_id()
            .map(str::to_string)
            .ok_or_else(|| QueueError::Unavailable("SendMessage returned no message id".to_string()))?;

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
        self.receive_from(&self.queue_url, max_messages, wait_time, None)
            .await
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| {
                if is_stale_receipt(&e) {
                    QueueError::AckFailed {
                        receipt_handle: receipt_handle.to_string(),
                    }
                } else {
                    QueueError::Unavailable(DisplayErrorContext(&e).to_string())
                }
            })?;

        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let visible = self
            .attribute_count(&self.queue_url, QueueAttributeName::ApproximateNumberOfMessages)
            .await?;
        let in_flight = self
            .attribute_count(
                &self.queue_url,
                QueueAttributeName::ApproximateNumberOfMessagesNotVisible,
            )
            .await?;
        let delayed = self
            .attribute_count(
                &self.queue_url,
                QueueAttributeName::ApproximateNumberOfMessagesDelayed,
            )
            .await?;
        let dead_letters = self
            .attribute_count(
                &self.dead_letter_queue_url,
                QueueAttributeName::ApproximateNumberOfMessages,
            )
            .await?;

        Ok(QueueStats {
            visible,
            in_flight,
            delayed,
            dead_letters,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        // Zero visibility leaves the records in place for the next reader.
        let deliveries = self.receive_dead_letters(limit, Some(0)).await?;

        Ok(deliveries
            .into_iter()
            .map(|delivery| DeadLetterRecord {
                message: delivery.message,
                failure_reason: format!(
                    "Exceeded max receive count of {}",
                    self.max_receive_count
                ),
                dead_lettered_at: None,
            })
            .collect())
    }

    async fn redrive_dead_letters(&self, limit: usize) -> Result<usize, QueueError> {
        let deliveries = self.receive_dead_letters(limit, None).await?;

        let mut redriven = 0;

        for delivery in deliveries {
            let sent = self
                .client
                .send_message()
                .queue_url(&self.queue_url)
                .message_body(delivery.message.body.clone())
                .set_message_attributes(type_attribute(&delivery.message.body).map(|attribute| {
                    HashMap::from([("notification_type".to_string(), attribute)])
                }))
                .send()
                .await;

            if let Err(e) = sent {
                warn!(
                    message_id = %delivery.message.message_id,
                    error = %DisplayErrorContext(&e),
                    "Failed to redrive dead letter"
                );
                continue;
            }

            if let Err(e) = self
                .client
                .delete_message()
                .queue_url(&self.dead_letter_queue_url)
                .receipt_handle(&delivery.receipt_handle)
                .send()
                .await
            {
                warn!(
                    message_id = %delivery.message.message_id,
                    error = %DisplayErrorContext(&e),
                    "Redriven dead letter could not be removed and may be redriven again"
                );
            }

            redriven += 1;
        }

        if redriven > 0 {
            info!(redriven, "Dead letters moved back to the notification queue");
        }

        Ok(redriven)
    }

    async fn purge(&self, queue: QueueKind) -> Result<(), QueueError> {
        let queue_url = self.queue_url(queue);

        self.client
            .purge_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| QueueError::Unavailable(DisplayErrorContext(&e).to_string()))?;

        warn!(queue_url = %queue_url, "Queue purged");

        Ok(())
    }
}
