pub mod health;
pub mod log;
pub mod memory;
pub mod publisher;
pub mod queue;
pub mod redis;
pub mod sns;
pub mod sqs;
