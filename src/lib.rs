//! # popqueue
//!
//! `popqueue` is the delivery engine of a message-queue broker. Producers push
//! messages into named queues; the engine stores them (in memory, or in an
//! append-only log on disk), hands them to consumers, tracks acknowledgments
//! and redelivers what was not acknowledged in time.
//!
//! ## Core Modules
//!
//! - `broker`: queues, the delivery handlers that decide every step of a
//!   message's life, the delivery tracker and the broker registry.
//! - `config`: loads broker settings from `config/default` and the
//!   environment.
//! - `persistence`: the write-ahead log, the message log built on it and the
//!   redelivery ledger.
//! - `utils`: the shared error type and tracing setup.

pub mod broker;
pub mod config;
pub mod persistence;
pub mod utils;
