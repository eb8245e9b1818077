//! The `error` module defines the error type shared by every part of the
//! delivery engine.
//!
//! Negative outcomes of the delivery protocol (deny, put back) are not errors;
//! they travel as `Decision` values. `BrokerError` covers what actually went
//! wrong: rejected producers, unreachable consumers, disk failures and
//! malformed log records.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised by the queue engine, its stores and its configuration.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The producer's message was refused (queue full, policy denial).
    #[error("message rejected by queue {queue}: {reason}")]
    ProducerRejected { queue: String, reason: String },

    /// A consumer's channel is closed; treated as a failed delivery.
    #[error("consumer {consumer} is unreachable")]
    ConsumerUnreachable { consumer: String },

    /// A delivery was not acknowledged before its deadline.
    #[error("acknowledge for message {message_id} timed out")]
    AcknowledgeTimeout { message_id: String },

    /// Disk write, flush or compaction failure.
    #[error("persistence failure on {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A malformed record found while replaying a log.
    #[error("corrupt log record at offset {offset}: {reason}")]
    CorruptLogRecord { offset: u64, reason: String },

    #[error("queue {0} not found")]
    QueueNotFound(String),

    #[error("queue {0} already exists")]
    QueueExists(String),

    #[error("queue {0} is destroyed")]
    QueueDestroyed(String),

    /// An operation that does not match the queue's dispatch type.
    #[error("queue {queue} does not support {operation}")]
    InvalidQueueType { queue: String, operation: String },

    /// A delivery handler callback failed.
    #[error("delivery handler failed: {0}")]
    Handler(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BrokerError {
    /// Wraps an I/O error with the file it happened on.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from the disk layer.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}
