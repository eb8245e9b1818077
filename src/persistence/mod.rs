//! The `persistence` module provides the on-disk side of a queue.
//!
//! Every message store that needs durability is backed by an append-only log
//! of insert and delete records; a second, smaller log (the redelivery
//! ledger) keeps delivery counters. Both replay on load and compact in the
//! background without stopping writers.
//!
//! Record layout (shared by both logs):
//!
//! ```text
//! [type:1][id-length:1][id bytes][content-length:varint][content bytes]
//! ```
//!
//! with type `Insert = 0x10`, `Delete = 0x11`, `Empty = 0x00`.

pub mod ledger;
pub mod record;
pub mod store;
pub mod varint;
pub mod wal;

pub use ledger::RedeliveryLedger;
pub use record::{Record, RecordType};
pub use store::PersistentStore;
pub use wal::{FlushMode, LogOptions, Replay, ShrinkStats, WriteAheadLog};

#[cfg(test)]
mod tests;
