//! Product notification pipeline for the inventory backend.
//!
//! ```text
//! product handler -> NotificationProducer -> QueueClient (SQS + DLQ)
//!     -> NotificationWorker -> NotificationDispatcher -> TopicPublisher (SNS)
//! ```

pub mod api;
pub mod clients;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod models;
pub mod producer;
pub mod utils;
pub mod worker;
