//! Append-only log file.
//!
//! `WriteAheadLog` owns one file of [`Record`]s. Writers only ever append;
//! the live set is rebuilt by replaying the file from the start. Compaction
//! (`shrink`) rewrites the file with live inserts only and swaps it in place
//! while appends keep flowing.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::record::{DecodeError, Record, RecordType};
use crate::utils::{BrokerError, Result};

/// When appended records reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Flush and `fdatasync` before every append returns.
    #[default]
    Sync,
    /// Keep records in the write buffer until `flush` is called.
    Buffered,
}

/// Options shared by every log a queue opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub flush: FlushMode,
    /// Copy the old file to `<file>.bak` before a shrink replaces it.
    pub keep_backup: bool,
}

/// Result of replaying a log file.
#[derive(Debug, Default)]
pub struct Replay {
    /// Live records in log order (latest insert per id, minus deletes).
    pub records: Vec<Record>,
    /// Records decoded, including superseded and deleted ones.
    pub total: u64,
    /// Records skipped because they were malformed.
    pub corrupt: u64,
    /// Length of the prefix that decoded cleanly.
    pub valid_len: u64,
}

impl Replay {
    /// Replays an in-memory image of a log.
    ///
    /// Records land in an arena; an id index points at the slot holding the
    /// current insert so deletes and re-inserts can tombstone it.
    pub fn from_bytes(data: Bytes) -> Self {
        let mut arena: Vec<Option<Record>> = Vec::new();
        let mut index: std::collections::HashMap<String, usize> = Default::default();
        let mut replay = Replay::default();
        let mut offset = 0usize;

        while offset < data.len() {
            match Record::decode(&data.slice(offset..)) {
                Ok((record, used)) => {
                    offset += used;
                    replay.valid_len = offset as u64;
                    match record.kind {
                        RecordType::Empty => {}
                        RecordType::Insert => {
                            replay.total += 1;
                            if let Some(slot) = index.insert(record.id.clone(), arena.len()) {
                                arena[slot] = None;
                            }
                            arena.push(Some(record));
                        }
                        RecordType::Delete => {
                            replay.total += 1;
                            if let Some(slot) = index.remove(&record.id) {
                                arena[slot] = None;
                            }
                        }
                    }
                }
                Err(DecodeError::Corrupt { len, reason }) => {
                    warn!(offset, %reason, "Skipping corrupt log record");
                    replay.corrupt += 1;
                    offset += len;
                    replay.valid_len = offset as u64;
                }
                Err(DecodeError::Incomplete) => {
                    warn!(offset, remaining = data.len() - offset, "Truncated log tail, ignoring");
                    break;
                }
                Err(DecodeError::Unframed(reason)) => {
                    warn!(offset, %reason, "Unreadable log framing, ignoring the rest of the file");
                    break;
                }
            }
        }

        replay.records = arena.into_iter().flatten().collect();
        replay
    }

    /// Replays the file at `path`; a missing file replays as empty.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_prefix(path, None)
    }

    fn from_prefix(path: &Path, limit: Option<u64>) -> Result<Self> {
        let mut data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(BrokerError::persistence(path, e)),
        };
        if let Some(limit) = limit {
            data.truncate(limit as usize);
        }
        Ok(Self::from_bytes(Bytes::from(data)))
    }
}

/// Outcome of one compaction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShrinkStats {
    pub live_records: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Appends that arrived while the rewrite was running.
    pub carried_over: u64,
}

struct LogState {
    writer: Option<BufWriter<File>>,
    len: u64,
    live: HashSet<String>,
    dead: u64,
    /// Records appended while a shrink is rewriting the file.
    pending: Option<Vec<Record>>,
    closed: bool,
}

pub struct WriteAheadLog {
    path: PathBuf,
    options: LogOptions,
    state: Mutex<LogState>,
}

impl WriteAheadLog {
    /// Opens (or creates) the log at `path`.
    ///
    /// The existing file is replayed once to rebuild the live id set. Bytes
    /// past the last readable record are cut off so new appends follow clean
    /// records; the untruncated file is first copied to `<path>.corrupt`.
    pub fn open(path: impl Into<PathBuf>, options: LogOptions) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| BrokerError::persistence(dir, e))?;
        }

        let replay = Replay::from_file(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BrokerError::persistence(&path, e))?;
        let on_disk = file
            .metadata()
            .map_err(|e| BrokerError::persistence(&path, e))?
            .len();
        if on_disk > replay.valid_len {
            let preserved = sibling(&path, "corrupt");
            std::fs::copy(&path, &preserved).map_err(|e| BrokerError::persistence(&preserved, e))?;
            warn!(
                path = %path.display(),
                cut = on_disk - replay.valid_len,
                preserved = %preserved.display(),
                "Truncating unreadable log tail"
            );
            file.set_len(replay.valid_len)
                .map_err(|e| BrokerError::persistence(&path, e))?;
        }

        let live: HashSet<String> = replay.records.iter().map(|r| r.id.clone()).collect();
        let dead = replay.total.saturating_sub(live.len() as u64);
        debug!(
            path = %path.display(),
            live = live.len(),
            dead,
            corrupt = replay.corrupt,
            "Opened log"
        );

        Ok(Self {
            path,
            options,
            state: Mutex::new(LogState {
                writer: Some(BufWriter::new(file)),
                len: replay.valid_len,
                live,
                dead,
                pending: None,
                closed: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    fn shrink_path(&self) -> PathBuf {
        sibling(&self.path, "shrink")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn closed_error(&self) -> BrokerError {
        BrokerError::persistence(
            &self.path,
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "log is closed"),
        )
    }

    /// Appends one record, honoring the flush mode.
    pub fn append(&self, record: Record) -> Result<()> {
        let mut buf = BytesMut::with_capacity(record.encoded_len());
        record.encode(&mut buf).map_err(|reason| {
            BrokerError::persistence(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, reason),
            )
        })?;

        let mut state = self.lock();
        let sync = self.options.flush == FlushMode::Sync;
        let writer = state.writer.as_mut().ok_or_else(|| self.closed_error())?;
        writer
            .write_all(&buf)
            .and_then(|_| if sync { writer.flush() } else { Ok(()) })
            .and_then(|_| if sync { writer.get_ref().sync_data() } else { Ok(()) })
            .map_err(|e| BrokerError::persistence(&self.path, e))?;

        state.len += buf.len() as u64;
        match record.kind {
            RecordType::Insert => {
                if !state.live.insert(record.id.clone()) {
                    state.dead += 1;
                }
            }
            RecordType::Delete => {
                state.dead += if state.live.remove(&record.id) { 2 } else { 1 };
            }
            RecordType::Empty => {}
        }
        if let Some(pending) = state.pending.as_mut() {
            pending.push(record);
        }
        Ok(())
    }

    /// Pushes buffered records to the file and syncs it.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        let Some(writer) = state.writer.as_mut() else {
            return Ok(());
        };
        writer
            .flush()
            .and_then(|_| writer.get_ref().sync_data())
            .map_err(|e| BrokerError::persistence(&self.path, e))
    }

    /// Replays the whole file, including records still in the write buffer.
    pub fn replay(&self) -> Result<Replay> {
        let mut state = self.lock();
        if let Some(writer) = state.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| BrokerError::persistence(&self.path, e))?;
        }
        Replay::from_file(&self.path)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().live.contains(id)
    }

    pub fn live_records(&self) -> u64 {
        self.lock().live.len() as u64
    }

    /// Superseded or deleted records a shrink would drop.
    pub fn dead_records(&self) -> u64 {
        self.lock().dead
    }

    pub fn len_bytes(&self) -> u64 {
        self.lock().len
    }

    pub fn is_shrinking(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Rewrites the file so it holds only live inserts.
    ///
    /// The lock is held only to mark the start (flush, remember the length)
    /// and to swap files at the end. Records appended in between go to the old
    /// file as usual and are also kept aside, then appended to the new file
    /// right before it replaces the old one.
    pub fn shrink(&self) -> Result<ShrinkStats> {
        let snapshot_len = {
            let mut state = self.lock();
            if state.pending.is_some() {
                debug!(path = %self.path.display(), "Shrink already running");
                return Ok(ShrinkStats::default());
            }
            let writer = state.writer.as_mut().ok_or_else(|| self.closed_error())?;
            writer
                .flush()
                .map_err(|e| BrokerError::persistence(&self.path, e))?;
            state.pending = Some(Vec::new());
            state.len
        };

        let tmp = self.shrink_path();
        let rewritten = self.rewrite_prefix(snapshot_len, &tmp);

        let mut state = self.lock();
        let pending = state.pending.take().unwrap_or_default();
        let live_records = match rewritten {
            Ok(count) if !state.closed => count,
            Ok(_) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(self.closed_error());
            }
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        };

        let swapped = self.swap_in(&mut state, &tmp, &pending);
        if let Err(e) = swapped {
            let _ = std::fs::remove_file(&tmp);
            if state.writer.is_none() && !state.closed {
                // the old file is still authoritative; keep appending to it
                state.writer = OpenOptions::new()
                    .append(true)
                    .open(&self.path)
                    .ok()
                    .map(BufWriter::new);
            }
            return Err(e);
        }

        let bytes_after = state.len;
        state.dead = pending
            .iter()
            .filter(|r| r.kind == RecordType::Delete)
            .count() as u64
            * 2;
        let stats = ShrinkStats {
            live_records,
            bytes_before: snapshot_len,
            bytes_after,
            carried_over: pending.len() as u64,
        };
        info!(path = %self.path.display(), ?stats, "Log shrink complete");
        Ok(stats)
    }

    /// Writes the live records of the first `limit` bytes to `tmp`.
    fn rewrite_prefix(&self, limit: u64, tmp: &Path) -> Result<u64> {
        let replay = Replay::from_prefix(&self.path, Some(limit))?;
        let mut buf = BytesMut::new();
        for record in &replay.records {
            record
                .encode(&mut buf)
                .map_err(|reason| BrokerError::CorruptLogRecord { offset: 0, reason })?;
        }
        let mut file = File::create(tmp).map_err(|e| BrokerError::persistence(tmp, e))?;
        file.write_all(&buf)
            .and_then(|_| file.sync_all())
            .map_err(|e| BrokerError::persistence(tmp, e))?;
        Ok(replay.records.len() as u64)
    }

    /// Appends the carried-over records to `tmp` and moves it over the log.
    /// Runs under the state lock.
    fn swap_in(&self, state: &mut LogState, tmp: &Path, pending: &[Record]) -> Result<()> {
        let mut buf = BytesMut::new();
        for record in pending {
            // ids were validated when the record was first appended
            let _ = record.encode(&mut buf);
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(tmp)
            .map_err(|e| BrokerError::persistence(tmp, e))?;
        file.write_all(&buf)
            .and_then(|_| file.sync_all())
            .map_err(|e| BrokerError::persistence(tmp, e))?;

        if let Some(mut old) = state.writer.take() {
            old.flush()
                .map_err(|e| BrokerError::persistence(&self.path, e))?;
        }
        if self.options.keep_backup {
            let backup = self.backup_path();
            std::fs::copy(&self.path, &backup).map_err(|e| BrokerError::persistence(&backup, e))?;
        }
        std::fs::rename(tmp, &self.path).map_err(|e| BrokerError::persistence(&self.path, e))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| BrokerError::persistence(&self.path, e))?;
        state.len = file
            .metadata()
            .map_err(|e| BrokerError::persistence(&self.path, e))?
            .len();
        state.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// Flushes and releases the file handle. Later appends fail.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.closed = true;
        if let Some(mut writer) = state.writer.take() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_all())
                .map_err(|e| BrokerError::persistence(&self.path, e))?;
        }
        Ok(())
    }

    /// Closes the log and removes its file, backup and corrupt copy from disk.
    pub fn destroy(&self) -> Result<()> {
        {
            let mut state = self.lock();
            state.closed = true;
            state.writer = None;
            state.live.clear();
            state.dead = 0;
            state.len = 0;
        }
        for path in [
            self.path.clone(),
            self.backup_path(),
            self.shrink_path(),
            sibling(&self.path, "corrupt"),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BrokerError::persistence(path, e)),
            }
        }
        info!(path = %self.path.display(), "Log destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Failed to close log on drop");
        }
    }
}

/// `orders.wal` -> `orders.wal.<ext>`
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
