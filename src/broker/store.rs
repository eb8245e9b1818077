//! In-memory message store, optionally backed by a persistent log.
//!
//! The memory side holds the messages waiting for dispatch in order. The
//! persistent side, when present, holds every saved message that is not yet
//! finished, including the ones currently in flight.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use tokio::time::Instant;

use super::message::QueueMessage;
use crate::persistence::{LogOptions, PersistentStore, ShrinkStats};
use crate::utils::Result;

#[derive(Debug)]
pub struct MessageStore {
    messages: Mutex<VecDeque<QueueMessage>>,
    persistent: Option<PersistentStore>,
}

impl MessageStore {
    pub fn in_memory() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            persistent: None,
        }
    }

    pub fn persistent(path: impl Into<PathBuf>, options: LogOptions) -> Result<Self> {
        Ok(Self {
            messages: Mutex::new(VecDeque::new()),
            persistent: Some(PersistentStore::open(path, options)?),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueMessage>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rebuilds the memory side from the persistent log. Delivery counts are
    /// taken from `counts` where known. Returns the number of messages loaded.
    pub fn load(&self, counts: &HashMap<String, u32>) -> Result<usize> {
        let Some(store) = &self.persistent else {
            return Ok(0);
        };

        let loaded = store.load()?;
        let mut messages = self.lock();
        for message in loaded {
            let mut qm = QueueMessage::new(message);
            qm.is_saved = true;
            qm.delivery_count = counts.get(qm.id()).copied().unwrap_or(0);
            messages.push_back(qm);
        }
        Ok(messages.len())
    }

    /// Persists `message`. A no-op for memory-only stores.
    pub fn save(&self, message: &mut QueueMessage) -> Result<()> {
        if let Some(store) = &self.persistent {
            store.insert(&message.message)?;
            message.is_saved = true;
        }
        Ok(())
    }

    /// Removes the persisted copy of `id`.
    pub fn delete_saved(&self, id: &str) -> Result<()> {
        match &self.persistent {
            Some(store) if store.contains(id) => store.delete(id),
            _ => Ok(()),
        }
    }

    pub fn put(&self, message: QueueMessage) {
        self.lock().push_back(message);
    }

    pub fn put_front(&self, message: QueueMessage) {
        self.lock().push_front(message);
    }

    pub fn take_next(&self) -> Option<QueueMessage> {
        self.lock().pop_front()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Ids of the waiting messages, head first.
    pub fn ids(&self) -> Vec<String> {
        self.lock().iter().map(|m| m.id().to_string()).collect()
    }

    /// Takes every waiting message received before `cutoff`.
    pub fn take_received_before(&self, cutoff: Instant) -> Vec<QueueMessage> {
        let mut messages = self.lock();
        let (expired, kept): (VecDeque<_>, VecDeque<_>) =
            messages.drain(..).partition(|m| m.received_at < cutoff);
        *messages = kept;
        expired.into()
    }

    /// Drops the memory side. Persisted copies are left alone.
    pub fn clear(&self) -> usize {
        let mut messages = self.lock();
        let count = messages.len();
        messages.clear();
        count
    }

    pub fn needs_shrink(&self, threshold: u64) -> bool {
        self.persistent
            .as_ref()
            .is_some_and(|store| store.needs_shrink(threshold))
    }

    pub fn shrink(&self) -> Result<Option<ShrinkStats>> {
        self.persistent.as_ref().map(|store| store.shrink()).transpose()
    }

    pub fn flush(&self) -> Result<()> {
        match &self.persistent {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }

    pub fn close(&self) -> Result<()> {
        match &self.persistent {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }

    /// Removes the backing files.
    pub fn destroy(&self) -> Result<()> {
        self.clear();
        match &self.persistent {
            Some(store) => store.destroy(),
            None => Ok(()),
        }
    }
}
