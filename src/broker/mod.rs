//! The `broker` module is the delivery engine: queues, their stores, the
//! delivery handlers that decide every transition and the broker that owns
//! them all.

pub mod catalog;
pub mod consumer;
pub mod context;
pub mod decision;
pub mod engine;
pub mod handler;
pub mod message;
pub mod options;
pub mod queue;
pub mod store;
pub mod tracker;

pub use catalog::{QueueCatalog, QueueDefinition};
pub use consumer::{Acknowledge, Consumer, Delivery, PullRequest};
pub use context::{BrokerContext, ErrorHook};
pub use decision::{Decision, PutBack, Transmission};
pub use engine::Broker;
pub use handler::{DeliveryHandler, FireAndForgetHandler, PersistentHandler};
pub use message::{CommitStatus, Message, QueueMessage, Receipt};
pub use options::{AckMode, CommitWhen, DeliveryPolicy, QueueOptions, QueueType};
pub use queue::{PushResult, Queue, QueueStatus};
