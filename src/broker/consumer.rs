use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::message::Message;
use crate::utils::{BrokerError, Result};

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub message: Message,
    /// The consumer must answer with an `Acknowledge` for this message.
    pub ack_required: bool,
}

/// Represents a consumer attached to a queue
/// The sender is the transport's outbound channel for this consumer; a closed
/// channel means the consumer is gone.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: String,
    pub sender: UnboundedSender<Delivery>,
}

impl Consumer {
    pub fn new(sender: UnboundedSender<Delivery>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), sender)
    }

    pub fn with_id(id: impl Into<String>, sender: UnboundedSender<Delivery>) -> Self {
        Self {
            id: id.into(),
            sender,
        }
    }

    /// Hands a delivery to the transport.
    pub fn send(&self, delivery: Delivery) -> Result<()> {
        self.sender
            .send(delivery)
            .map_err(|_| BrokerError::ConsumerUnreachable {
                consumer: self.id.clone(),
            })
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// A consumer's answer to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    pub message_id: String,
    pub success: bool,
    pub reason: Option<String>,
}

impl Acknowledge {
    pub fn ack(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            success: true,
            reason: None,
        }
    }

    pub fn nack(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// Parameters of a pull from a `Pull` queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullRequest {
    /// Maximum number of messages to return.
    pub count: usize,
}

impl PullRequest {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Default for PullRequest {
    fn default() -> Self {
        Self { count: 1 }
    }
}
