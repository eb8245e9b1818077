//! The queue catalog: the JSON file listing every queue the broker should
//! recreate on start.
//!
//! ```json
//! { "queues": [ { "name": "orders", "path": "data/orders.wal", "options": { ... } } ] }
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::options::QueueOptions;
use crate::utils::{BrokerError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub name: String,
    /// Main log file. Defaults to `<data_dir>/<name>.wal`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub options: QueueOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCatalog {
    #[serde(default)]
    pub queues: Vec<QueueDefinition>,
}

impl QueueCatalog {
    /// Reads the catalog at `path`. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No queue catalog yet");
                return Ok(Self::default());
            }
            Err(e) => return Err(BrokerError::persistence(path, e)),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Writes the catalog through a temporary file so a crash never leaves
    /// a half-written catalog behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| BrokerError::persistence(parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&tmp, data).map_err(|e| BrokerError::persistence(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| BrokerError::persistence(path, e))
    }

    pub fn get(&self, name: &str) -> Option<&QueueDefinition> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Adds `definition`, replacing any queue with the same name.
    pub fn upsert(&mut self, definition: QueueDefinition) {
        match self.queues.iter_mut().find(|q| q.name == definition.name) {
            Some(existing) => *existing = definition,
            None => self.queues.push(definition),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<QueueDefinition> {
        let index = self.queues.iter().position(|q| q.name == name)?;
        Some(self.queues.remove(index))
    }
}
