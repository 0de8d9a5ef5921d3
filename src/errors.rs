use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Acknowledgement failed, receipt handle is stale: {receipt_handle}")]
    AckFailed { receipt_handle: String },

    #[error("Invalid queue request: {0}")]
    InvalidRequest(String),

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Topic unavailable: {0}")]
    Unavailable(String),

    #[error("Publish rejected: {0}")]
    Rejected(String),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Publish unavailable: {0}")]
    PublishUnavailable(String),

    #[error("Publish rejected: {0}")]
    PublishRejected(String),
}

impl From<PublishError> for DispatchError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::Unavailable(reason) => DispatchError::PublishUnavailable(reason),
            PublishError::Rejected(reason) => DispatchError::PublishRejected(reason),
        }
    }
}
