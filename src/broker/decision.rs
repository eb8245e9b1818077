//! Decisions returned by delivery handlers.
//!
//! A handler never touches stores or producers itself; it describes what
//! should happen and the queue carries it out.

use serde::{Deserialize, Serialize};

/// Where a message goes when it returns to its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutBack {
    /// Do not return the message; it is finished.
    No,
    /// Back to the tail of its store.
    #[default]
    Regular,
    /// Back to the head of its store, ahead of everything waiting.
    Priority,
}

/// Acknowledgment to send to the producer, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transmission {
    #[default]
    None,
    Commit,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Proceed with the transition, or abort it.
    pub allow: bool,
    /// The message must be persisted before proceeding.
    pub save: bool,
    pub put_back: PutBack,
    pub transmission: Transmission,
}

impl Decision {
    /// Proceed; nothing to save, nothing to put back, nobody to notify.
    pub const fn allow() -> Self {
        Self {
            allow: true,
            save: false,
            put_back: PutBack::No,
            transmission: Transmission::None,
        }
    }

    pub const fn deny() -> Self {
        Self {
            allow: false,
            ..Self::allow()
        }
    }

    /// Proceed, but return the message to its queue.
    pub const fn put_back(mode: PutBack) -> Self {
        Self {
            put_back: mode,
            ..Self::allow()
        }
    }

    pub const fn with_save(mut self, save: bool) -> Self {
        self.save = save;
        self
    }

    pub const fn with_put_back(mut self, mode: PutBack) -> Self {
        self.put_back = mode;
        self
    }

    pub const fn with_transmission(mut self, transmission: Transmission) -> Self {
        self.transmission = transmission;
        self
    }
}

impl Default for Decision {
    fn default() -> Self {
        Self::allow()
    }
}
