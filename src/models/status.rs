use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// Per-message dispatch state: `received -> delivering -> {delivered | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Received,
    Delivering,
    Delivered,
    Failed,
}

/// What the worker did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOutcome {
    Delivered,
    Rejected,
    Failed,
    Exhausted,
}

impl Display for DeliveryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DeliveryState::Received => write!(f, "received"),
            DeliveryState::Delivering => write!(f, "delivering"),
            DeliveryState::Delivered => write!(f, "delivered"),
            DeliveryState::Failed => write!(f, "failed"),
        }
    }
}
