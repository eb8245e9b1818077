//! Redelivery ledger
//!
//! A small log of `message id -> delivery count`, kept apart from message
//! contents so counts survive restarts even when the message itself is never
//! rewritten. Every `set` appends a fresh record; replay keeps the latest one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::warn;

use super::record::Record;
use super::varint;
use super::wal::{LogOptions, Replay, ShrinkStats, WriteAheadLog};
use crate::utils::Result;

#[derive(Debug)]
pub struct RedeliveryLedger {
    log: WriteAheadLog,
}

impl RedeliveryLedger {
    pub fn open(path: impl Into<PathBuf>, options: LogOptions) -> Result<Self> {
        Ok(Self {
            log: WriteAheadLog::open(path, options)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Records the current delivery count of `id`.
    pub fn set(&self, id: &str, count: u32) -> Result<()> {
        let mut buf = BytesMut::with_capacity(varint::MAX_VARINT_LEN);
        varint::write(u64::from(count), &mut buf);
        self.log.append(Record::insert(id, buf.freeze()))
    }

    /// Forgets `id` once its message is gone for good.
    pub fn remove(&self, id: &str) -> Result<()> {
        if !self.log.contains(id) {
            return Ok(());
        }
        self.log.append(Record::delete(id))
    }

    /// Replays the ledger into an id -> count map.
    pub fn load(&self) -> Result<HashMap<String, u32>> {
        Ok(decode_counts(self.log.replay()?))
    }

    pub fn len(&self) -> u64 {
        self.log.live_records()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

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

/// Reads the counts of a ledger file without opening it for writing.
pub fn read_counts(path: &Path) -> Result<HashMap<String, u32>> {
    Ok(decode_counts(Replay::from_file(path)?))
}

fn decode_counts(replay: Replay) -> HashMap<String, u32> {
    let mut counts = HashMap::with_capacity(replay.records.len());
    for record in replay.records {
        let mut content = record.content.clone();
        match varint::read(&mut content) {
            Ok(count) => {
                counts.insert(record.id, u32::try_from(count).unwrap_or(u32::MAX));
            }
            Err(e) => warn!(id = %record.id, error = ?e, "Skipping unreadable ledger entry"),
        }
    }
    counts
}
