//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `popqueue` engine.
//!
//! It centralizes the crate-wide error type and the tracing setup so every
//! other module reports failures and logs the same way.

pub mod error;
pub mod logging;

pub use error::{BrokerError, Result};

#[cfg(test)]
mod tests;
