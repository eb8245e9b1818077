//! Message definitions for the broker
//!
//! `Message` is the already-parsed protocol message handed to the engine by
//! the transport. `QueueMessage` wraps it with the bookkeeping a queue keeps
//! while the message moves through its lifecycle.
//!
//! Notes on fields:
//! - `message_id`: unique within a queue; the broker generates a UUID when the
//!   producer leaves it empty
//! - `payload`: opaque body, stored and forwarded untouched
//! - `headers`: free-form metadata; the broker adds `x-delivery-count` on
//!   redeliveries
//! - `timestamp`: milliseconds since UNIX epoch; set by the broker upon push

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

/// Header carrying the delivery count to consumers once it exceeds one.
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub payload: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub high_priority: bool,
    #[serde(default)]
    pub timestamp: i64,
}

impl Message {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            headers: BTreeMap::new(),
            high_priority: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    /// The redelivery count a consumer sees, if the message was redelivered.
    pub fn delivery_count(&self) -> Option<u32> {
        self.headers
            .get(DELIVERY_COUNT_HEADER)
            .and_then(|v| v.parse().ok())
    }
}

/// Outcome reported back to a producer that asked for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Committed,
    Failed,
}

/// Producer side of a push: resolves once the queue commits or fails the
/// message according to its commit policy.
#[derive(Debug)]
pub struct Receipt(oneshot::Receiver<CommitStatus>);

impl Receipt {
    /// Waits for the commit decision. `None` when the queue never answers
    /// (commit policy `None`, or the message was dropped without a decision).
    pub async fn wait(self) -> Option<CommitStatus> {
        self.0.await.ok()
    }

    /// Non-blocking check.
    pub fn try_status(&mut self) -> Option<CommitStatus> {
        self.0.try_recv().ok()
    }
}

/// Queue side of a receipt. Clones share the channel; only the first
/// notification is delivered.
#[derive(Debug, Clone)]
pub struct ProducerLink(Arc<Mutex<Option<oneshot::Sender<CommitStatus>>>>);

impl ProducerLink {
    pub fn channel() -> (Self, Receipt) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), Receipt(rx))
    }

    /// Sends `status` if nothing was sent before. Returns whether it was sent.
    pub fn notify(&self, status: CommitStatus) -> bool {
        let sender = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    pub fn is_notified(&self) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

/// A message held by a queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message: Message,
    /// Times the message was handed out by `begin_send`. Never decreases.
    pub delivery_count: u32,
    /// Present in the queue's persistent store.
    pub is_saved: bool,
    /// Finished; must not be dispatched again.
    pub is_removed: bool,
    /// Consumers the current send attempt reached.
    pub send_count: u32,
    pub received_at: Instant,
    pub producer: Option<ProducerLink>,
}

impl QueueMessage {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            delivery_count: 0,
            is_saved: false,
            is_removed: false,
            send_count: 0,
            received_at: Instant::now(),
            producer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.message.message_id
    }

    pub fn is_high_priority(&self) -> bool {
        self.message.high_priority
    }

    /// Notifies the producer, if one is waiting.
    pub fn notify_producer(&self, status: CommitStatus) {
        if let Some(link) = &self.producer {
            link.notify(status);
        }
    }
}
