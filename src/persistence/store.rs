//! Message log backing one in-memory message store.
//!
//! Each insert appends the `serde_json` encoding of the message; each delete
//! appends a tombstone for its id. Loading replays the file and decodes the
//! surviving inserts.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::warn;

use super::record::Record;
use super::wal::{LogOptions, Replay, ShrinkStats, WriteAheadLog};
use crate::broker::message::Message;
use crate::utils::Result;

#[derive(Debug)]
pub struct PersistentStore {
    log: WriteAheadLog,
}

impl PersistentStore {
    /// Open or create the log at `path` with the given flush/backup policy.
    pub fn open(path: impl Into<PathBuf>, options: LogOptions) -> Result<Self> {
        Ok(Self {
            log: WriteAheadLog::open(path, options)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Appends an insert record for `message`.
    pub fn insert(&self, message: &Message) -> Result<()> {
        let content = serde_json::to_vec(message)?;
        self.log
            .append(Record::insert(message.message_id.clone(), Bytes::from(content)))
    }

    /// Appends a delete record for `id`.
    pub fn delete(&self, id: &str) -> Result<()> {
        self.log.append(Record::delete(id))
    }

    /// Replays the log and returns the live messages in insertion order.
    pub fn load(&self) -> Result<Vec<Message>> {
        Ok(decode_messages(self.log.replay()?))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.log.contains(id)
    }

    pub fn live_records(&self) -> u64 {
        self.log.live_records()
    }

    pub fn dead_records(&self) -> u64 {
        self.log.dead_records()
    }

    /// Whether enough dead records piled up to be worth a shrink.
    pub fn needs_shrink(&self, threshold: u64) -> bool {
        threshold > 0 && self.log.dead_records() >= threshold && !self.log.is_shrinking()
    }

    pub fn shrink(&self) -> Result<ShrinkStats> {
        self.log.shrink()
    }

    pub fn flush(&self) -> Result<()> {
        self.log.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.log.close()
    }

    pub fn destroy(&self) -> Result<()> {
        self.log.destroy()
    }
}

/// Reads the live messages of a log file without opening it for writing.
pub fn read_messages(path: &Path) -> Result<Vec<Message>> {
    Ok(decode_messages(Replay::from_file(path)?))
}

fn decode_messages(replay: Replay) -> Vec<Message> {
    replay
        .records
        .into_iter()
        .filter_map(|record| match serde_json::from_slice::<Message>(&record.content) {
            Ok(mut message) => {
                // the record id is authoritative
                message.message_id = record.id;
                Some(message)
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "Dropping undecodable message record");
                None
            }
        })
        .collect()
}
