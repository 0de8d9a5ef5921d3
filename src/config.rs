use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::RetryConfig;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Sqs,
    Memory,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PublisherBackend {
    Sns,
    Log,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_queue_backend")]
    pub queue_backend: QueueBackend,
    #[serde(default = "default_publisher_backend")]
    pub publisher_backend: PublisherBackend,

    pub aws_region: Option<String>,
    pub aws_endpoint_url: Option<String>,

    #[serde(default = "default_notification_queue_name")]
    pub notification_queue_name: String,
    #[serde(default = "default_dead_letter_queue_name")]
    pub dead_letter_queue_name: String,
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u32,
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    #[serde(default = "default_topic_name")]
    pub topic_name: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    pub worker_id: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    pub redis_url: Option<String>,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(1..=10).contains(&self.batch_size) {
            return Err(anyhow!("BATCH_SIZE must be between 1 and 10"));
        }
        if self.wait_time_seconds > 20 {
            return Err(anyhow!("WAIT_TIME_SECONDS must be at most 20"));
        }
        if self.visibility_timeout_seconds > 43_200 {
            return Err(anyhow!("VISIBILITY_TIMEOUT_SECONDS must be at most 43200"));
        }
        if !(1..=1000).contains(&self.max_receive_count) {
            return Err(anyhow!("MAX_RECEIVE_COUNT must be between 1 and 1000"));
        }
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds as u64)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()))
    }
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Sqs
}

fn default_publisher_backend() -> PublisherBackend {
    PublisherBackend::Sns
}

fn default_notification_queue_name() -> String {
    "notification-processing-queue".to_string()
}

fn default_dead_letter_queue_name() -> String {
    "notification-dead-letter-queue".to_string()
}

fn default_visibility_timeout_seconds() -> u32 {
    30
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_topic_name() -> String {
    "product-notifications".to_string()
}

fn default_batch_size() -> u32 {
    10
}

fn default_wait_time_seconds() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_heartbeat_interval_seconds() -> u64 {
    15
}

fn default_server_port() -> u16 {
    8080
}
