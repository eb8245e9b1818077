//! Tracking of deliveries that wait for an acknowledgment.
//!
//! Every tracked delivery resolves exactly once: through `process` when the
//! consumer answers, through `sweep` when its deadline passes, or through
//! `mark_all_expired` when the queue shuts down. Resolution removes the
//! entry under the tracker's lock, so whichever path gets there first wins
//! and the others find nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::message::QueueMessage;

/// Upper bound for deadlines, used when a timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, saturating at `FAR_FUTURE` from now.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// A message in flight.
#[derive(Debug, Clone)]
pub struct MessageDelivery {
    pub message: QueueMessage,
    /// Consumers the message was sent to. Any one of them may resolve it.
    pub consumers: Vec<String>,
    pub deadline: Instant,
    pub completed: bool,
    resolved: Arc<Notify>,
}

impl MessageDelivery {
    pub fn message_id(&self) -> &str {
        self.message.id()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Wakes whoever waits on this delivery. Called once the resolution has
    /// been applied.
    pub(crate) fn notify_resolved(&self) {
        self.resolved.notify_one();
    }

    fn complete(mut self) -> Self {
        self.completed = true;
        self
    }
}

#[derive(Debug)]
pub struct DeliveryTracker {
    ack_timeout: Duration,
    deliveries: Mutex<HashMap<String, MessageDelivery>>,
}

impl DeliveryTracker {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            ack_timeout,
            deliveries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MessageDelivery>> {
        self.deliveries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts tracking `message` with a deadline of now plus the ack
    /// timeout. The returned `Notify` fires once the delivery is resolved.
    pub fn track(&self, message: QueueMessage, consumers: Vec<String>) -> Arc<Notify> {
        let resolved = Arc::new(Notify::new());
        let id = message.id().to_string();
        let delivery = MessageDelivery {
            message,
            consumers,
            deadline: deadline_after(self.ack_timeout),
            completed: false,
            resolved: resolved.clone(),
        };

        if self.lock().insert(id.clone(), delivery).is_some() {
            warn!(message_id = %id, "Replaced a delivery that was still tracked");
        }
        resolved
    }

    /// Takes the delivery of `message_id` on behalf of `consumer_id`.
    /// `None` if it is unknown, already resolved, or was not sent to that
    /// consumer.
    pub fn process(&self, consumer_id: &str, message_id: &str) -> Option<MessageDelivery> {
        let mut deliveries = self.lock();
        let delivery = deliveries.get(message_id)?;
        if !delivery.consumers.iter().any(|c| c == consumer_id) {
            debug!(%message_id, %consumer_id, "Acknowledge from a consumer that did not receive the message");
            return None;
        }
        deliveries.remove(message_id).map(MessageDelivery::complete)
    }

    /// Drops a delivery that never reached anyone, or whose send was
    /// abandoned. `None` if it was already resolved.
    pub fn cancel(&self, message_id: &str) -> Option<MessageDelivery> {
        self.lock().remove(message_id).map(MessageDelivery::complete)
    }

    /// Takes every delivery whose deadline is at or before `now`.
    pub fn sweep(&self, now: Instant) -> Vec<MessageDelivery> {
        let mut deliveries = self.lock();
        let expired: Vec<String> = deliveries
            .iter()
            .filter(|(_, d)| d.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| deliveries.remove(id))
            .map(MessageDelivery::complete)
            .collect()
    }

    /// Takes every outstanding delivery at once.
    pub fn mark_all_expired(&self) -> Vec<MessageDelivery> {
        self.lock()
            .drain()
            .map(|(_, delivery)| delivery.complete())
            .collect()
    }

    pub fn is_tracked(&self, message_id: &str) -> bool {
        self.lock().contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
