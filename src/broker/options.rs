//! Per-queue configuration.
//!
//! Options are fixed when a queue is created and are stored in the queue
//! catalog, so every field serializes. Durations are kept in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::decision::PutBack;
use crate::persistence::{FlushMode, LogOptions};

/// Default time a consumer has to acknowledge a delivery.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 15_000;

/// Default number of dead log records that triggers a shrink.
pub const DEFAULT_SHRINK_THRESHOLD: u64 = 1_000;

/// How consumers acknowledge deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Deliveries are final once sent.
    #[default]
    None,
    /// Consumers must acknowledge, but dispatch does not wait for them.
    JustRequest,
    /// Dispatch holds the next message until the current one is resolved.
    WaitForAcknowledge,
}

impl AckMode {
    pub fn requires_ack(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// At which point the producer receives its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitWhen {
    AfterReceived,
    AfterSaved,
    AfterAcknowledge,
    #[default]
    None,
}

/// Consumer selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    /// Every consumer receives each message; messages wait for consumers.
    #[default]
    Push,
    /// Each message goes to the next consumer in rotation.
    RoundRobin,
    /// Consumers ask for messages; nothing is dispatched on its own.
    Pull,
    /// Every online consumer receives each message; with nobody online the
    /// message is dropped.
    Broadcast,
}

/// Which delivery handler a queue is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    #[default]
    FireAndForget,
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub queue_type: QueueType,
    pub delivery: DeliveryPolicy,
    pub ack_mode: AckMode,
    pub ack_timeout_ms: u64,
    /// Messages waiting longer than this are dropped. Zero disables it.
    pub message_timeout_ms: u64,
    /// Delay before a put-back message becomes visible again.
    pub put_back_delay_ms: u64,
    pub commit_when: CommitWhen,
    /// Put-back mode applied when a delivery fails or times out.
    pub put_back: PutBack,
    /// Maximum stored messages. Zero means unlimited.
    pub message_limit: usize,
    /// Deliveries after which a failed message is no longer put back.
    /// Zero means unlimited.
    pub delivery_limit: u32,
    /// Keep delivery counts in a redelivery ledger next to the message log.
    pub use_redelivery: bool,
    pub flush: FlushMode,
    pub shrink_threshold: u64,
    pub keep_backup: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            queue_type: QueueType::Push,
            delivery: DeliveryPolicy::FireAndForget,
            ack_mode: AckMode::None,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            message_timeout_ms: 0,
            put_back_delay_ms: 0,
            commit_when: CommitWhen::None,
            put_back: PutBack::Regular,
            message_limit: 0,
            delivery_limit: 0,
            use_redelivery: false,
            flush: FlushMode::Sync,
            shrink_threshold: DEFAULT_SHRINK_THRESHOLD,
            keep_backup: false,
        }
    }
}

impl QueueOptions {
    /// Options for a durable queue that commits once messages are on disk.
    pub fn persistent() -> Self {
        Self {
            delivery: DeliveryPolicy::Persistent,
            commit_when: CommitWhen::AfterSaved,
            use_redelivery: true,
            ..Self::default()
        }
    }

    pub fn with_queue_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    pub fn with_ack(mut self, mode: AckMode, timeout: Duration) -> Self {
        self.ack_mode = mode;
        self.ack_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_commit_when(mut self, commit_when: CommitWhen) -> Self {
        self.commit_when = commit_when;
        self
    }

    pub fn with_put_back(mut self, put_back: PutBack, delay: Duration) -> Self {
        self.put_back = put_back;
        self.put_back_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn message_timeout(&self) -> Option<Duration> {
        (self.message_timeout_ms > 0).then(|| Duration::from_millis(self.message_timeout_ms))
    }

    pub fn put_back_delay(&self) -> Option<Duration> {
        (self.put_back_delay_ms > 0).then(|| Duration::from_millis(self.put_back_delay_ms))
    }

    pub fn is_persistent(&self) -> bool {
        self.delivery == DeliveryPolicy::Persistent
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            flush: self.flush,
            keep_backup: self.keep_backup,
        }
    }
}
