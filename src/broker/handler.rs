//! Delivery handlers.
//!
//! A handler is consulted at every transition of a message's life and
//! answers with a `Decision`. The queue engine is the only place that acts
//! on those decisions, so a handler can be swapped without touching the
//! dispatch logic.

use std::fmt::Debug;
use std::sync::Arc;

use super::consumer::{Acknowledge, Consumer};
use super::decision::{Decision, PutBack, Transmission};
use super::message::QueueMessage;
use super::options::{CommitWhen, DeliveryPolicy, QueueOptions};
use super::queue::Queue;
use super::tracker::MessageDelivery;
use crate::utils::Result;

/// Callbacks invoked by a queue as messages move from producer to consumer.
///
/// Returning `Err` aborts the current transition; the queue reports the
/// error and returns the message to the tail of its store.
pub trait DeliveryHandler: Debug + Send + Sync {
    /// A producer pushed `message`. `save` asks the queue to persist it.
    fn received_from_producer(&self, queue: &Queue, message: &QueueMessage) -> Result<Decision>;

    /// `message` is about to be sent. Its delivery count is already bumped.
    fn begin_send(&self, _queue: &Queue, _message: &QueueMessage) -> Result<Decision> {
        Ok(Decision::allow())
    }

    /// Whether `consumer` may receive `message`.
    fn can_consumer_receive(
        &self,
        _queue: &Queue,
        _message: &QueueMessage,
        _consumer: &Consumer,
    ) -> Result<Decision> {
        Ok(Decision::allow())
    }

    /// The send attempt finished; `message.send_count` holds how many
    /// consumers it reached.
    fn end_send(&self, queue: &Queue, message: &QueueMessage) -> Result<Decision>;

    /// A consumer acknowledged (or rejected) a tracked delivery.
    fn acknowledge_received(
        &self,
        queue: &Queue,
        delivery: &MessageDelivery,
        ack: &Acknowledge,
    ) -> Result<Decision>;

    /// A tracked delivery passed its deadline without an acknowledgment.
    fn acknowledge_timeout(&self, queue: &Queue, delivery: &MessageDelivery) -> Result<Decision>;
}

/// Builds the handler named by the queue's options.
pub fn for_options(options: &QueueOptions) -> Arc<dyn DeliveryHandler> {
    match options.delivery {
        DeliveryPolicy::FireAndForget => Arc::new(FireAndForgetHandler),
        DeliveryPolicy::Persistent => Arc::new(PersistentHandler),
    }
}

/// Commit to send once a message is accepted, if the policy commits early.
fn on_receive(options: &QueueOptions) -> Transmission {
    match options.commit_when {
        CommitWhen::AfterReceived | CommitWhen::AfterSaved => Transmission::Commit,
        CommitWhen::AfterAcknowledge | CommitWhen::None => Transmission::None,
    }
}

fn on_acknowledge(options: &QueueOptions, success: bool) -> Transmission {
    match (options.commit_when, success) {
        (CommitWhen::AfterAcknowledge, true) => Transmission::Commit,
        (CommitWhen::AfterAcknowledge, false) => Transmission::Failed,
        _ => Transmission::None,
    }
}

/// Memory-only delivery. Nothing is saved and nothing is put back: a failed
/// or timed out delivery is simply dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct FireAndForgetHandler;

impl DeliveryHandler for FireAndForgetHandler {
    fn received_from_producer(&self, queue: &Queue, _message: &QueueMessage) -> Result<Decision> {
        Ok(Decision::allow().with_transmission(on_receive(queue.options())))
    }

    fn end_send(&self, _queue: &Queue, _message: &QueueMessage) -> Result<Decision> {
        Ok(Decision::allow())
    }

    fn acknowledge_received(
        &self,
        queue: &Queue,
        _delivery: &MessageDelivery,
        ack: &Acknowledge,
    ) -> Result<Decision> {
        Ok(Decision::allow().with_transmission(on_acknowledge(queue.options(), ack.success)))
    }

    fn acknowledge_timeout(&self, queue: &Queue, _delivery: &MessageDelivery) -> Result<Decision> {
        Ok(Decision::allow().with_transmission(on_acknowledge(queue.options(), false)))
    }
}

/// Durable delivery. Every accepted message is saved; failed deliveries are
/// put back according to the queue's put-back mode until the delivery limit
/// is reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersistentHandler;

impl PersistentHandler {
    fn failed(&self, queue: &Queue, message: &QueueMessage) -> Decision {
        let options = queue.options();
        let exhausted =
            options.delivery_limit > 0 && message.delivery_count >= options.delivery_limit;

        if exhausted || options.put_back == PutBack::No {
            Decision::allow().with_transmission(on_acknowledge(options, false))
        } else {
            Decision::put_back(options.put_back)
        }
    }
}

impl DeliveryHandler for PersistentHandler {
    fn received_from_producer(&self, queue: &Queue, _message: &QueueMessage) -> Result<Decision> {
        Ok(Decision::allow()
            .with_save(true)
            .with_transmission(on_receive(queue.options())))
    }

    fn end_send(&self, _queue: &Queue, _message: &QueueMessage) -> Result<Decision> {
        Ok(Decision::allow())
    }

    fn acknowledge_received(
        &self,
        queue: &Queue,
        delivery: &MessageDelivery,
        ack: &Acknowledge,
    ) -> Result<Decision> {
        if ack.success {
            Ok(Decision::allow().with_transmission(on_acknowledge(queue.options(), true)))
        } else {
            Ok(self.failed(queue, &delivery.message))
        }
    }

    fn acknowledge_timeout(&self, queue: &Queue, delivery: &MessageDelivery) -> Result<Decision> {
        Ok(self.failed(queue, &delivery.message))
    }
}
